use std::sync::Arc;

use color_eyre::eyre::eyre;
use eidas_engine::{
    clock::SystemClock,
    config::Config,
    engine::EngineSet,
    telemetry,
    transport::{LightToken, LightTokenCodec},
};
use tracing::info;

/// Loads the configuration, builds every engine instance and checks that
/// each can produce its signed metadata. With an instance name as argument
/// that instance's metadata is written to stdout.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let config = Config::load()?;
    let clock = Arc::new(SystemClock);
    let engines = EngineSet::from_config(&config, clock.clone()).await?;

    for name in engines.names() {
        let metadata = engines.get(name)?.generate_metadata()?;
        info!(instance = name, bytes = metadata.len(), "Instance ready");
    }

    if let Some(light_token) = &config.light_token {
        let codec = LightTokenCodec::new(light_token.secret.clone());
        let token = LightToken::generate(&light_token.issuer, clock.as_ref());
        let encoded = codec.encode_base64(&token)?;
        if codec.decode_base64(&encoded)? != token {
            return Err(eyre!("Light token self-check failed"));
        }
        info!(issuer = light_token.issuer, "Light token channel ready");
    }

    if let Some(name) = std::env::args().nth(1) {
        println!("{}", engines.get(&name)?.generate_metadata()?);
    }
    Ok(())
}
