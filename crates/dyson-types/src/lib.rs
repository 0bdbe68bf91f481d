//! Transport-agnostic types for Dyson Link fans and purifiers.
//!
//! This crate provides the values shared by the device client (dyson-core)
//! and the exporter (dyson-exporter).
//!
//! # Features
//!
//! - Device identity and product classification (generation, capabilities)
//! - Immutable device state snapshots
//! - Enum types for fan mode, oscillation state and fan speed
//!
//! # Example
//!
//! ```
//! use dyson_types::{DeviceIdentity, Generation};
//!
//! let identity = DeviceIdentity::new("AB1-UK-AAA0111A", "Living room", "438", true).unwrap();
//! assert_eq!(identity.generation, Generation::V2);
//! ```

pub mod error;
pub mod snapshot;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use snapshot::{DeviceStateSnapshot, FanMode, FanSpeed, OscillationState};
pub use types::{Capabilities, DeviceIdentity, Generation, ProductType};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn fan_speed_levels_parse(level in 0u8..=10) {
            let raw = format!("{:04}", level);
            prop_assert_eq!(raw.parse::<FanSpeed>().unwrap(), FanSpeed::Level(level));
        }

        #[test]
        fn unknown_product_codes_are_v1(code in "[0-9]{3}") {
            prop_assume!(!["469", "475", "455", "438", "520", "527", "358", "276"].contains(&code.as_str()));
            let identity = DeviceIdentity::new("S", "N", code, true).unwrap();
            prop_assert_eq!(identity.generation, Generation::V1);
            prop_assert!(!identity.is_heating());
        }
    }
}
