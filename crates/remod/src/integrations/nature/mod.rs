mod binary_sensor;
mod button;
mod client;
mod climate;
mod config;
mod coordinator;
mod entity;
mod icons;
mod media_player;
mod models;
#[allow(clippy::module_inception)]
mod nature;
mod number;
mod rate_limit;
mod remote;
mod sensor;

pub use config::Config as NatureConfig;
use linkme::distributed_slice;
pub use nature::NatureIntegration;

use crate::engine;

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_nature(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let config = if let Some(c) = &ctx.config.integrations.nature {
        c
    } else {
        return Ok(None);
    };

    if !config.enabled {
        return Ok(None);
    }

    Ok(Some(Box::new(NatureIntegration::new(config))))
}
