//! Business documents and the GRE despatch (waybill) model.
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A business document that can be rendered to XML and submitted.
///
/// The concrete Rust type selects the XML builder; [`Document::name`] is the
/// identifier the document is submitted under.
pub trait Document: 'static {
    fn name(&self) -> String;
}

/// SUNAT catalogue 01 code for a sender's electronic waybill.
pub const DESPATCH_DOC_TYPE: &str = "09";

/// Electronic waybill (guía de remisión remitente).
///
/// # Examples
/// ```rust
/// use gre_core::document::{Company, Despatch, Document};
///
/// let despatch = Despatch {
///     series: "T001".into(),
///     correlative: "123".into(),
///     company: Company {
///         ruc: "20123456789".into(),
///         legal_name: "EMPRESA DEMO SAC".into(),
///         trade_name: None,
///     },
///     ..Despatch::default()
/// };
/// assert_eq!(despatch.name(), "20123456789-09-T001-123");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Despatch {
    pub version: String,
    pub doc_type: String,
    pub series: String,
    pub correlative: String,
    pub issued_at: NaiveDateTime,
    pub note: Option<String>,
    pub company: Company,
    pub recipient: Party,
    pub shipment: Shipment,
    pub details: Vec<DespatchDetail>,
}

impl Despatch {
    /// Series and correlative joined as printed on the document, e.g. `T001-123`.
    pub fn number(&self) -> String {
        format!("{}-{}", self.series, self.correlative)
    }
}

impl Default for Despatch {
    fn default() -> Self {
        Self {
            version: "2022".into(),
            doc_type: DESPATCH_DOC_TYPE.into(),
            series: String::new(),
            correlative: String::new(),
            issued_at: NaiveDateTime::default(),
            note: None,
            company: Company::default(),
            recipient: Party::default(),
            shipment: Shipment::default(),
            details: Vec::new(),
        }
    }
}

impl Document for Despatch {
    fn name(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.company.ruc, self.doc_type, self.series, self.correlative
        )
    }
}

/// Issuing company.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub ruc: String,
    pub legal_name: String,
    #[serde(default)]
    pub trade_name: Option<String>,
}

/// Party identified by a SUNAT catalogue 06 identity document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub doc_type: String,
    pub doc_number: String,
    pub name: String,
}

/// Transport mode (catalogue 18).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportMode {
    /// Carried by a third-party carrier.
    #[default]
    #[serde(rename = "01")]
    Public,
    /// Carried with the sender's own vehicles and drivers.
    #[serde(rename = "02")]
    Private,
}

impl TransportMode {
    pub fn code(&self) -> &'static str {
        match self {
            TransportMode::Public => "01",
            TransportMode::Private => "02",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Shipment {
    /// Reason for transfer (catalogue 20), e.g. `01` for a sale.
    pub reason_code: String,
    pub reason_description: Option<String>,
    pub mode: TransportMode,
    pub start_date: NaiveDate,
    pub gross_weight: f64,
    pub weight_unit: String,
    pub packages: Option<u32>,
    pub departure: Address,
    pub arrival: Address,
    pub carrier: Option<Carrier>,
    pub vehicle_plate: Option<String>,
    pub drivers: Vec<Driver>,
}

impl Default for Shipment {
    fn default() -> Self {
        Self {
            reason_code: "01".into(),
            reason_description: None,
            mode: TransportMode::default(),
            start_date: NaiveDate::default(),
            gross_weight: 0.0,
            weight_unit: "KGM".into(),
            packages: None,
            departure: Address::default(),
            arrival: Address::default(),
            carrier: None,
            vehicle_plate: None,
            drivers: Vec::new(),
        }
    }
}

/// Address identified by its INEI ubigeo code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub ubigeo: String,
    pub line: String,
}

/// Third-party carrier for public transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Carrier {
    pub doc_type: String,
    pub doc_number: String,
    pub name: String,
    #[serde(default)]
    pub mtc_registration: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    /// `Principal` or `Secundario`.
    pub role: String,
    pub doc_type: String,
    pub doc_number: String,
    pub license: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DespatchDetail {
    pub quantity: f64,
    pub unit: String,
    pub description: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub sunat_product_code: Option<String>,
}
