use super::detect_capabilities;
use crate::cli::RuntimeConfig;
use crate::runtime::SystemRunner;

pub async fn detect(json: bool, offline: bool, config: &RuntimeConfig) -> anyhow::Result<i32> {
    let runner = SystemRunner::new();
    let caps = detect_capabilities(&runner, offline.then_some(true)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&caps)?);
        return Ok(0);
    }
    config.section("Capabilities")?;
    for line in caps.summary_lines() {
        config.indent(&line)?;
    }
    Ok(0)
}
