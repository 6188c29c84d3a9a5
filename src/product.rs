use serde::{Deserialize, Serialize};

/// Keeps extended family, extended model, base family and base model of CPUID(1).EAX.
pub const CPUID_PRODUCT_MASK: u32 = 0x0FFF_0FF0;

const CPUID_BASE_FAMILY: u32 = 0xF;

#[derive(Debug, PartialEq, Eq, Copy, Clone, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SevProductName {
    #[default]
    Unknown,
    Milan,
    Genoa,
    Turin,
}

impl SevProductName {
    /// CPU family and model of the product line.
    fn family_model(self) -> Option<(u32, u32)> {
        match self {
            SevProductName::Milan => Some((0x19, 0x01)),
            SevProductName::Genoa => Some((0x19, 0x11)),
            SevProductName::Turin => Some((0x1A, 0x02)),
            SevProductName::Unknown => None,
        }
    }

    /// Product name as used in AMD KDS paths.
    pub fn kds_name(self) -> Option<&'static str> {
        match self {
            SevProductName::Milan => Some("Milan"),
            SevProductName::Genoa => Some("Genoa"),
            SevProductName::Turin => Some("Turin"),
            SevProductName::Unknown => None,
        }
    }
}

/// The AMD product a (simulated) guest claims to run on.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash, Serialize, Deserialize)]
pub struct SevProduct {
    pub name: SevProductName,
    #[serde(default)]
    pub machine_stepping: Option<u32>,
}

/// The first commercially available SEV-SNP part, Milan B1.
pub const DEFAULT_SEV_PRODUCT: SevProduct = SevProduct {
    name: SevProductName::Milan,
    machine_stepping: Some(1),
};

impl Default for SevProduct {
    fn default() -> Self {
        DEFAULT_SEV_PRODUCT
    }
}

impl SevProduct {
    pub fn new(name: SevProductName, machine_stepping: Option<u32>) -> Self {
        Self {
            name,
            machine_stepping,
        }
    }

    /// CPUID(1).EAX for this product, masked with [CPUID_PRODUCT_MASK].
    /// Unknown products yield 0.
    pub fn masked_cpuid1_eax(&self) -> u32 {
        let Some((family, model)) = self.name.family_model() else {
            return 0;
        };
        let extended_family = family - CPUID_BASE_FAMILY;
        let stepping = self.machine_stepping.unwrap_or(0) & 0xF;
        let eax = (extended_family << 20)
            | ((model >> 4) << 16)
            | (CPUID_BASE_FAMILY << 8)
            | ((model & 0xF) << 4)
            | stepping;
        eax & CPUID_PRODUCT_MASK
    }

    /// Recovers the product from a raw CPUID(1).EAX value.
    pub fn from_cpuid1_eax(eax: u32) -> Self {
        let masked = eax & CPUID_PRODUCT_MASK;
        let name = [
            SevProductName::Milan,
            SevProductName::Genoa,
            SevProductName::Turin,
        ]
        .into_iter()
        .find(|name| SevProduct::new(*name, None).masked_cpuid1_eax() == masked)
        .unwrap_or(SevProductName::Unknown);
        Self {
            name,
            machine_stepping: Some(eax & 0xF),
        }
    }
}
