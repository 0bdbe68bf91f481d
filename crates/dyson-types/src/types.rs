//! Device identity and product classification.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Protocol generation of a device.
///
/// The generation decides which fields a device reports and therefore which
/// metrics apply to it. It is a closed set: every supported product maps to
/// exactly one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Generation {
    /// "Link" devices (Pure Cool Link, Pure Hot+Cool Link).
    V1,
    /// Second generation devices (Pure Cool, Pure Hot+Cool, Pure Humidify+Cool).
    V2,
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generation::V1 => write!(f, "V1"),
            Generation::V2 => write!(f, "V2"),
        }
    }
}

/// Known device models.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new models
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum ProductType {
    /// Pure Cool Link desk fan (469).
    PureCoolLinkDesk,
    /// Pure Cool Link tower fan (475).
    PureCoolLinkTower,
    /// Pure Hot+Cool Link (455).
    PureHotCoolLink,
    /// Pure Cool tower (438).
    PureCoolTower,
    /// Pure Cool desk (520).
    PureCoolDesk,
    /// Pure Hot+Cool (527).
    PureHotCool,
    /// Pure Humidify+Cool (358).
    PureHumidifyCool,
    /// Pure Cool with formaldehyde sensor (438E, 438K).
    PureCoolFormaldehyde,
    /// Pure Hot+Cool with formaldehyde sensor (527E, 527K).
    PureHotCoolFormaldehyde,
    /// Pure Humidify+Cool with formaldehyde sensor (358E, 358K).
    PureHumidifyCoolFormaldehyde,
}

impl ProductType {
    /// Classify a product type code as found in the device cache.
    ///
    /// Returns `Ok(None)` for codes that are not recognised; callers decide how
    /// to treat them. Robot vacuums are rejected outright.
    ///
    /// # Examples
    ///
    /// ```
    /// use dyson_types::{Generation, ProductType};
    ///
    /// let model = ProductType::from_code("455").unwrap().unwrap();
    /// assert_eq!(model, ProductType::PureHotCoolLink);
    /// assert_eq!(model.generation(), Generation::V1);
    /// assert!(model.has_heating());
    ///
    /// assert!(ProductType::from_code("N223").is_err());
    /// assert_eq!(ProductType::from_code("999").unwrap(), None);
    /// ```
    pub fn from_code(code: &str) -> ParseResult<Option<Self>> {
        let model = match code.trim().to_ascii_uppercase().as_str() {
            "469" => ProductType::PureCoolLinkDesk,
            "475" => ProductType::PureCoolLinkTower,
            "455" => ProductType::PureHotCoolLink,
            "438" => ProductType::PureCoolTower,
            "520" => ProductType::PureCoolDesk,
            "527" => ProductType::PureHotCool,
            "358" => ProductType::PureHumidifyCool,
            "438E" | "438K" => ProductType::PureCoolFormaldehyde,
            "527E" | "527K" => ProductType::PureHotCoolFormaldehyde,
            "358E" | "358K" => ProductType::PureHumidifyCoolFormaldehyde,
            "N223" | "276" => return Err(ParseError::UnsupportedProduct(code.to_string())),
            _ => return Ok(None),
        };
        Ok(Some(model))
    }

    /// Protocol generation spoken by this model.
    #[must_use]
    pub fn generation(&self) -> Generation {
        match self {
            ProductType::PureCoolLinkDesk
            | ProductType::PureCoolLinkTower
            | ProductType::PureHotCoolLink => Generation::V1,
            _ => Generation::V2,
        }
    }

    /// Whether the model has a heater.
    #[must_use]
    pub fn has_heating(&self) -> bool {
        matches!(
            self,
            ProductType::PureHotCoolLink
                | ProductType::PureHotCool
                | ProductType::PureHotCoolFormaldehyde
        )
    }

    /// Whether the model carries a formaldehyde sensor.
    #[must_use]
    pub fn has_formaldehyde(&self) -> bool {
        matches!(
            self,
            ProductType::PureCoolFormaldehyde
                | ProductType::PureHotCoolFormaldehyde
                | ProductType::PureHumidifyCoolFormaldehyde
        )
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProductType::PureCoolLinkDesk => "Pure Cool Link Desk",
            ProductType::PureCoolLinkTower => "Pure Cool Link",
            ProductType::PureHotCoolLink => "Pure Hot+Cool Link",
            ProductType::PureCoolTower => "Pure Cool",
            ProductType::PureCoolDesk => "Pure Cool Desk",
            ProductType::PureHotCool => "Pure Hot+Cool",
            ProductType::PureHumidifyCool => "Pure Humidify+Cool",
            ProductType::PureCoolFormaldehyde => "Pure Cool Formaldehyde",
            ProductType::PureHotCoolFormaldehyde => "Pure Hot+Cool Formaldehyde",
            ProductType::PureHumidifyCoolFormaldehyde => "Pure Humidify+Cool Formaldehyde",
        };
        write!(f, "{}", name)
    }
}

/// Capabilities that change which metrics apply, beyond the generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Capabilities {
    /// Device has a heater (heat mode/state/target).
    pub heating: bool,
    /// Device reports formaldehyde.
    pub formaldehyde: bool,
}

/// Immutable identity of a configured device.
///
/// Built once from configuration and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceIdentity {
    /// Serial number, e.g. `AB1-UK-AAA0111A`. Unique per device.
    pub serial: String,
    /// Display name, e.g. `Living room`.
    pub name: String,
    /// Raw product type code, e.g. `475`. Also used in MQTT topics.
    pub product_type: String,
    /// Recognised model, if the product code is known.
    pub model: Option<ProductType>,
    /// Protocol generation.
    pub generation: Generation,
    /// Derived capabilities.
    pub capabilities: Capabilities,
    /// Whether the device is marked active in the device cache.
    pub active: bool,
}

impl DeviceIdentity {
    /// Build an identity, classifying the product type code.
    ///
    /// Unknown product codes are treated as V1 devices without heating,
    /// which is how Link-era devices without a specific model entry behave.
    pub fn new(
        serial: impl Into<String>,
        name: impl Into<String>,
        product_type: impl Into<String>,
        active: bool,
    ) -> ParseResult<Self> {
        let product_type = product_type.into();
        let model = ProductType::from_code(&product_type)?;
        let generation = model.map_or(Generation::V1, |m| m.generation());
        let capabilities = model.map_or_else(Capabilities::default, |m| Capabilities {
            heating: m.has_heating(),
            formaldehyde: m.has_formaldehyde(),
        });

        Ok(Self {
            serial: serial.into(),
            name: name.into(),
            product_type: product_type.trim().to_string(),
            model,
            generation,
            capabilities,
            active,
        })
    }

    /// Whether heating metrics apply to this device.
    #[must_use]
    pub fn is_heating(&self) -> bool {
        self.capabilities.heating
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.serial)
    }
}
