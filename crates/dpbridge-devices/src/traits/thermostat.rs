use async_trait::async_trait;
use tracing::debug;

use dpbridge_core::Result;

use super::{CapabilityTrait, TraitContext};
use crate::capability::CapabilityName;
use crate::converter::Converter;

const TARGET_KEY: &str = "target_temperature";
const CURRENT_KEY: &str = "current_temperature";
const MEASURE_CAPABILITY: &str = "measure_temperature";

/// Setpoint plus optional room temperature riding on a second datapoint.
///
/// `target_temperature` is required and writeable. `current_temperature`,
/// when mapped, is reported into `measure_temperature` if the device has it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetTemperatureTrait;

#[async_trait]
impl CapabilityTrait for TargetTemperatureTrait {
    fn dp_keys(&self, _capability: &CapabilityName) -> Vec<String> {
        vec![TARGET_KEY.to_string(), CURRENT_KEY.to_string()]
    }

    async fn install(&self, ctx: &mut TraitContext<'_>) -> Result<()> {
        let capability = ctx.capability().clone();
        let target_keys = [TARGET_KEY.to_string()];
        let (key, dp) = ctx
            .lookup_datapoint(&target_keys)
            .ok_or_else(|| ctx.missing_datapoint(&target_keys))?;

        let converter = ctx.converter(&key, Converter::divide(10.0))?;
        ctx.writeable(dp, converter.clone());
        ctx.bind(&key, dp, capability.as_str(), converter);

        if let Some((key, dp)) = ctx.lookup_datapoint(&[CURRENT_KEY]) {
            if ctx.device.has_capability(MEASURE_CAPABILITY) {
                let converter = ctx.converter(&key, Converter::divide(10.0))?;
                ctx.bind(&key, dp, MEASURE_CAPABILITY, converter);
            } else {
                debug!(device = ctx.device.id(), dp, "Device has no measure_temperature, ignoring current temperature");
            }
        }
        Ok(())
    }
}
