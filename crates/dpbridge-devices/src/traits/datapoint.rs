use async_trait::async_trait;

use dpbridge_core::Result;

use super::{CapabilityTrait, TraitContext};
use crate::capability::CapabilityName;
use crate::converter::Converter;

/// One capability on one datapoint through one converter.
///
/// Covers plain sensors, alarms and writeable switches/enums. The datapoint
/// is looked up under the default key first, then the full capability name.
#[derive(Debug, Clone)]
pub struct DatapointTrait {
    converter: Converter,
    writeable: bool,
}

impl DatapointTrait {
    pub fn sensor(converter: Converter) -> Self {
        Self {
            converter,
            writeable: false,
        }
    }

    pub fn writeable(converter: Converter) -> Self {
        Self {
            converter,
            writeable: true,
        }
    }
}

#[async_trait]
impl CapabilityTrait for DatapointTrait {
    fn dp_keys(&self, capability: &CapabilityName) -> Vec<String> {
        let default = capability.default_dp_key();
        if default == capability.as_str() {
            vec![default]
        } else {
            vec![default, capability.to_string()]
        }
    }

    async fn install(&self, ctx: &mut TraitContext<'_>) -> Result<()> {
        let capability = ctx.capability().clone();
        let keys = self.dp_keys(&capability);
        let (key, dp) = ctx
            .lookup_datapoint(&keys)
            .ok_or_else(|| ctx.missing_datapoint(&keys))?;

        let converter = ctx.converter(&key, self.converter.clone())?;
        if self.writeable {
            ctx.writeable(dp, converter.clone());
        }
        ctx.bind(&key, dp, capability.as_str(), converter);
        Ok(())
    }
}
