//! Configuration inspection command — `templar config`.

use anyhow::Result;

use templar::config::Settings;

pub fn cmd_config() -> Result<()> {
    let settings = Settings::from_env();
    println!("host_api_base:    {}", settings.host_api_base);
    println!("host_web_base:    {}", settings.host_web_base);
    println!("agent_api_base:   {}", settings.agent_api_base);
    println!("host_token:       {}", redact(&settings.host_token));
    println!("agent_api_key:    {}", redact(&settings.agent_api_key));
    println!("populate_settle:  {:?}", settings.populate_settle);
    println!("copy_throttle:    {:?}", settings.copy_throttle);
    println!("keepalive:        {:?}", settings.keepalive);
    println!("job_ttl:          {:?}", settings.job_ttl);
    if settings.host_token.trim().is_empty() {
        println!("note: no host token set, `serve` will run in mock mode");
    }
    Ok(())
}

fn redact(secret: &str) -> String {
    if secret.trim().is_empty() {
        "(not set)".to_string()
    } else {
        format!("set ({} chars)", secret.len())
    }
}
