//! Config command - view or modify configuration.

use anyhow::Result;
use wayfare_chat_core::SyncConfig;

pub async fn execute(key: Option<String>, value: Option<String>) -> Result<()> {
    let mut config = SyncConfig::load_with_env()?;

    match (key.as_deref(), value) {
        (None, None) => {
            println!("Current Configuration");
            println!("=====================");
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        (Some(key), None) => match key {
            "typing_ttl_ms" => println!("{}", config.typing_ttl_ms),
            "max_message_length" => println!("{}", config.max_message_length),
            "event_capacity" => println!("{}", config.event_capacity),
            _ => println!("Unknown config key: {}", key),
        },
        (Some(key), Some(value)) => match key {
            "typing_ttl_ms" => {
                config.typing_ttl_ms = value.parse()?;
                config.save()?;
                println!("Set typing_ttl_ms = {}", config.typing_ttl_ms);
            }
            "max_message_length" => {
                config.max_message_length = value.parse()?;
                config.save()?;
                println!("Set max_message_length = {}", config.max_message_length);
            }
            "event_capacity" => {
                config.event_capacity = value.parse()?;
                config.save()?;
                println!("Set event_capacity = {}", config.event_capacity);
            }
            _ => println!("Cannot set config key: {}", key),
        },
        (None, Some(_)) => {
            println!("Must specify a key to set a value");
        }
    }

    Ok(())
}
