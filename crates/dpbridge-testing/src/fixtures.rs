//! Sample catalogs.

use dpbridge_devices::{Catalog, Converter, Fingerprint, Profile, ProfileOptions, Registry};

/// Manufacturer string of the reference climate sensor.
pub const CLIMATE_MANUFACTURER: &str = "_TZE200_abcdefgh";
/// Model id of the reference climate sensor.
pub const CLIMATE_MODEL: &str = "TS0601";

pub fn climate_basic_profile() -> Profile {
    Profile::new("climate_basic", ["measure_temperature", "measure_humidity"])
        .with_datapoint("temperature", 1)
        .with_datapoint("humidity", 2)
}

pub fn climate_basic_fingerprint() -> Fingerprint {
    Fingerprint::new(CLIMATE_MANUFACTURER, CLIMATE_MODEL, "climate_basic")
        .with_display_name("Climate sensor")
}

/// Radiator valve: setpoint, mode, battery.
///
/// Room temperature rides on a second datapoint of `target_temperature` and
/// lands in `measure_temperature` when the device exposes it.
pub fn thermostat_profile() -> Profile {
    Profile::new(
        "thermostat_trv",
        ["target_temperature", "thermostat_mode", "measure_battery"],
    )
    .with_datapoint("target_temperature", 2)
    .with_datapoint("current_temperature", 3)
    .with_datapoint("thermostat_mode", 4)
    .with_datapoint("battery", 14)
}

/// Two-gang plug with a dimmer channel and power metering.
pub fn smart_plug_profile() -> Profile {
    Profile::new(
        "smart_plug",
        ["onoff", "onoff.usb2", "dim", "measure_power", "measure_voltage"],
    )
    .with_datapoint("onoff", 1)
    .with_datapoint("onoff_usb2", 2)
    .with_datapoint("dim", 3)
    .with_datapoint("power", 19)
    .with_datapoint("voltage", 20)
}

pub fn curtain_profile() -> Profile {
    Profile::new("curtain_motor", ["windowcoverings_state", "dim"])
        .with_datapoint("windowcoverings_state", 1)
        .with_datapoint("dim", 2)
}

/// Door sensor: inverted contact on a dp, battery on the standard cluster.
pub fn contact_sensor_profile() -> Profile {
    Profile::new("contact_sensor", ["alarm_contact", "measure_battery"])
        .with_datapoint("contact", 1)
        .with_options(ProfileOptions::new().with_converter("contact", &Converter::boolean(true)))
}

/// Every sample profile with one fingerprint each.
pub fn sample_catalog() -> Catalog {
    Catalog::new()
        .with_profile(climate_basic_profile())
        .with_profile(thermostat_profile())
        .with_profile(smart_plug_profile())
        .with_profile(curtain_profile())
        .with_profile(contact_sensor_profile())
        .with_fingerprint(climate_basic_fingerprint())
        .with_fingerprint(Fingerprint::new("_TZE200_ckud7u2l", "TS0601", "thermostat_trv"))
        .with_fingerprint(
            Fingerprint::new("_TZ3000_plug0001", "TS011F", "smart_plug").with_endpoints(vec![1, 2]),
        )
        .with_fingerprint(Fingerprint::new("_TZE200_cowvfni3", "TS0601", "curtain_motor"))
        .with_fingerprint(Fingerprint::new("_TZ3000_door0001", "TS0203", "contact_sensor"))
}

/// Registry over [`sample_catalog`].
pub async fn sample_registry() -> Registry {
    match sample_catalog().into_registry().await {
        Ok(registry) => registry,
        Err(e) => panic!("sample catalog must load: {e}"),
    }
}
