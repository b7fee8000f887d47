use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use dpbridge_core::{CapabilityValue, EventBus, Result};

use super::{set_and_publish, CapabilityTrait, TraitContext};
use crate::capability::CapabilityName;
use crate::converter::Converter;
use crate::datapoint::{DpValue, POWER_CONFIG_CLUSTER};
use crate::endpoint::{AttributeMap, CapabilityDevice, EndpointEvent, EndpointListener};

/// Power-configuration attribute holding battery level in half percent.
pub const BATTERY_PERCENTAGE_ATTRIBUTE: &str = "batteryPercentageRemaining";

/// Battery level from a datapoint or, failing that, the standard cluster.
///
/// With a mapped datapoint the device reports whole percent. Without one the
/// trait listens for `batteryPercentageRemaining` reports and reads the
/// attribute once to seed the capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatteryTrait;

#[async_trait]
impl CapabilityTrait for BatteryTrait {
    fn dp_keys(&self, capability: &CapabilityName) -> Vec<String> {
        vec![capability.default_dp_key(), capability.to_string()]
    }

    async fn install(&self, ctx: &mut TraitContext<'_>) -> Result<()> {
        let capability = ctx.capability().clone();
        let keys = self.dp_keys(&capability);

        if let Some((key, dp)) = ctx.lookup_datapoint(&keys) {
            let converter = ctx.converter(&key, Converter::Percent)?;
            ctx.bind(&key, dp, capability.as_str(), converter);
            return Ok(());
        }

        let listener = Arc::new(BatteryAttributeListener {
            device: Arc::clone(ctx.device),
            capability: capability.to_string(),
            events: ctx.events.clone(),
        });
        ctx.subscribe(POWER_CONFIG_CLUSTER, listener);

        match ctx
            .endpoint
            .read_attributes(POWER_CONFIG_CLUSTER, &[BATTERY_PERCENTAGE_ATTRIBUTE])
            .await
        {
            Ok(attributes) => {
                if let Some(value) = battery_value(&attributes) {
                    ctx.update(capability.as_str(), value).await?;
                }
            }
            Err(e) => {
                debug!(device = ctx.device.id(), capability = %capability, error = %e, "Initial battery read failed");
            }
        }
        Ok(())
    }
}

fn battery_value(attributes: &AttributeMap) -> Option<CapabilityValue> {
    let raw = attributes.get(BATTERY_PERCENTAGE_ATTRIBUTE)?.as_i64()?;
    let raw = i32::try_from(raw).ok()?;
    Some(Converter::Battery.decode(&DpValue::Value(raw)))
}

struct BatteryAttributeListener {
    device: Arc<dyn CapabilityDevice>,
    capability: String,
    events: EventBus,
}

#[async_trait]
impl EndpointListener for BatteryAttributeListener {
    async fn on_event(&self, event: &EndpointEvent) {
        let EndpointEvent::AttributeReport {
            cluster,
            attributes,
        } = event
        else {
            return;
        };
        if *cluster != POWER_CONFIG_CLUSTER {
            return;
        }
        let Some(value) = battery_value(attributes) else {
            return;
        };
        if let Err(e) =
            set_and_publish(self.device.as_ref(), &self.events, &self.capability, value, None).await
        {
            debug!(device = self.device.id(), capability = %self.capability, error = %e, "Battery update failed");
        }
    }
}
