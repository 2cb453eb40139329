//! Template-vs-customized classification of documents.
//!
//! Used only to decide whether a saved document counts as real work for a phase gate.
//! The default strategy is lenient: a handful of edited lines is enough.

use crate::core::config::DetectorConfig;

pub trait ChangeDetector: Send + Sync {
    /// Whether `document` has been meaningfully edited relative to `template`.
    fn is_customized(&self, document: &str, template: &str) -> bool;
}

/// Compares non-blank lines positionally.
///
/// Customized when the non-blank line counts differ by more than `line_tolerance`,
/// or when more than `changed_ratio` of the compared lines differ. Comparing zero
/// lines is never a customization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineDiffDetector {
    pub line_tolerance: usize,
    pub changed_ratio: f64,
}

impl Default for LineDiffDetector {
    fn default() -> Self {
        DetectorConfig::default().into()
    }
}

impl From<DetectorConfig> for LineDiffDetector {
    fn from(cfg: DetectorConfig) -> Self {
        Self {
            line_tolerance: cfg.line_tolerance,
            changed_ratio: cfg.changed_ratio,
        }
    }
}

fn content_lines(text: &str) -> Vec<&str> {
    text.lines().filter(|l| !l.trim().is_empty()).collect()
}

impl ChangeDetector for LineDiffDetector {
    fn is_customized(&self, document: &str, template: &str) -> bool {
        let doc = content_lines(document);
        let tpl = content_lines(template);

        if doc.len().abs_diff(tpl.len()) > self.line_tolerance {
            return true;
        }
        let compared = doc.len().min(tpl.len());
        if compared == 0 {
            return false;
        }
        let differing = doc.iter().zip(tpl.iter()).filter(|(a, b)| a != b).count();
        (differing as f64 / compared as f64) > self.changed_ratio
    }
}
