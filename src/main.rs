fn main() -> anyhow::Result<()> {
    projstate::run()?;
    Ok(())
}
