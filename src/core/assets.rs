//! Initial document templates, embedded at compile time.
//!
//! These are the documents a new project starts from. The change detector compares
//! saved documents against them to decide whether a phase has seen real work.

/// Embeds each template as a constant and generates lookup helpers.
macro_rules! embedded_templates {
    ($($path:expr => $const_name:ident),* $(,)?) => {
        $(
            pub const $const_name: &str = include_str!(concat!("../../templates/", $path));
        )*

        pub fn get_template(name: &str) -> Option<&'static str> {
            let key = name.strip_prefix("templates/").unwrap_or(name);
            match key {
                $( $path => Some($const_name), )*
                _ => None,
            }
        }

        pub fn list_templates() -> Vec<&'static str> {
            vec![ $( $path, )* ]
        }
    };
}

embedded_templates! {
    "requirements.md" => REQUIREMENTS_TEMPLATE,
    "scope.md" => SCOPE_TEMPLATE,
    "structure.md" => STRUCTURE_TEMPLATE,
}
