use super::{
    constants::{
        CAC_NS, CATALOG_01_URI, CATALOG_06_URI, CATALOG_18_URI, CATALOG_20_URI, CATALOG_25_URI,
        CBC_NS, DESPATCH_NS, DS_NS, EXT_NS, SIGNATURE_ID, SUNAT_AGENCY,
    },
    writer::{decimal, XmlOut},
    BuilderError, XmlBuilder,
};
use crate::{
    config::BuilderOptions,
    document::{Address, Carrier, Company, Despatch, DespatchDetail, Driver, Party, TransportMode},
};

type Result<T> = std::result::Result<T, BuilderError>;

/// Renders a [`Despatch`] as a UBL 2.1 `DespatchAdvice` (GRE 2022 format).
///
/// The output carries an empty `ext:ExtensionContent` for the signer to fill.
#[derive(Debug, Clone, Copy, Default)]
pub struct DespatchBuilder;

impl XmlBuilder<Despatch> for DespatchBuilder {
    fn build(&self, document: &Despatch, options: &BuilderOptions) -> Result<String> {
        let mut out = XmlOut::new(options);
        out.declaration()?;
        out.open(
            "DespatchAdvice",
            &[
                ("xmlns", DESPATCH_NS),
                ("xmlns:ds", DS_NS),
                ("xmlns:cac", CAC_NS),
                ("xmlns:cbc", CBC_NS),
                ("xmlns:ext", EXT_NS),
            ],
        )?;
        out.open("ext:UBLExtensions", &[])?;
        out.open("ext:UBLExtension", &[])?;
        out.empty("ext:ExtensionContent", &[])?;
        out.close("ext:UBLExtension")?;
        out.close("ext:UBLExtensions")?;

        out.leaf("cbc:UBLVersionID", &[], "2.1")?;
        out.leaf("cbc:CustomizationID", &[], "2.0")?;
        out.leaf("cbc:ID", &[], &document.number())?;
        out.leaf(
            "cbc:IssueDate",
            &[],
            &document.issued_at.format("%Y-%m-%d").to_string(),
        )?;
        out.leaf(
            "cbc:IssueTime",
            &[],
            &document.issued_at.format("%H:%M:%S").to_string(),
        )?;
        out.leaf(
            "cbc:DespatchAdviceTypeCode",
            &[
                ("listAgencyName", SUNAT_AGENCY),
                ("listName", "Tipo de Documento"),
                ("listURI", CATALOG_01_URI),
            ],
            &document.doc_type,
        )?;
        if let Some(note) = document.note.as_deref() {
            out.text_leaf("cbc:Note", note)?;
        }

        write_signature(&mut out, &document.company)?;

        out.open("cac:DespatchSupplierParty", &[])?;
        write_party(&mut out, "6", &document.company.ruc, &document.company.legal_name)?;
        out.close("cac:DespatchSupplierParty")?;

        out.open("cac:DeliveryCustomerParty", &[])?;
        let recipient: &Party = &document.recipient;
        write_party(&mut out, &recipient.doc_type, &recipient.doc_number, &recipient.name)?;
        out.close("cac:DeliveryCustomerParty")?;

        write_shipment(&mut out, document)?;

        for (index, detail) in document.details.iter().enumerate() {
            write_line(&mut out, index + 1, detail)?;
        }

        out.close("DespatchAdvice")?;
        out.finish()
    }
}

fn write_signature(out: &mut XmlOut, company: &Company) -> Result<()> {
    out.open("cac:Signature", &[])?;
    out.leaf("cbc:ID", &[], &company.ruc)?;
    out.open("cac:SignatoryParty", &[])?;
    out.open("cac:PartyIdentification", &[])?;
    out.leaf("cbc:ID", &[], &company.ruc)?;
    out.close("cac:PartyIdentification")?;
    out.open("cac:PartyName", &[])?;
    out.text_leaf(
        "cbc:Name",
        company.trade_name.as_deref().unwrap_or(&company.legal_name),
    )?;
    out.close("cac:PartyName")?;
    out.close("cac:SignatoryParty")?;
    out.open("cac:DigitalSignatureAttachment", &[])?;
    out.open("cac:ExternalReference", &[])?;
    out.leaf("cbc:URI", &[], &format!("#{SIGNATURE_ID}"))?;
    out.close("cac:ExternalReference")?;
    out.close("cac:DigitalSignatureAttachment")?;
    out.close("cac:Signature")
}

fn write_party(out: &mut XmlOut, doc_type: &str, doc_number: &str, name: &str) -> Result<()> {
    out.open("cac:Party", &[])?;
    out.open("cac:PartyIdentification", &[])?;
    out.leaf("cbc:ID", &identity_attrs(doc_type), doc_number)?;
    out.close("cac:PartyIdentification")?;
    out.open("cac:PartyLegalEntity", &[])?;
    out.text_leaf("cbc:RegistrationName", name)?;
    out.close("cac:PartyLegalEntity")?;
    out.close("cac:Party")
}

fn identity_attrs(doc_type: &str) -> [(&str, &str); 4] {
    [
        ("schemeID", doc_type),
        ("schemeName", "Documento de Identidad"),
        ("schemeAgencyName", SUNAT_AGENCY),
        ("schemeURI", CATALOG_06_URI),
    ]
}

fn write_shipment(out: &mut XmlOut, document: &Despatch) -> Result<()> {
    let shipment = &document.shipment;
    out.open("cac:Shipment", &[])?;
    out.leaf("cbc:ID", &[], "SUNAT_Envio")?;
    out.leaf(
        "cbc:HandlingCode",
        &[
            ("listAgencyName", SUNAT_AGENCY),
            ("listName", "Motivo de traslado"),
            ("listURI", CATALOG_20_URI),
        ],
        &shipment.reason_code,
    )?;
    if let Some(description) = shipment.reason_description.as_deref() {
        out.text_leaf("cbc:HandlingInstructions", description)?;
    }
    out.leaf(
        "cbc:GrossWeightMeasure",
        &[("unitCode", shipment.weight_unit.as_str())],
        &decimal(shipment.gross_weight, 3),
    )?;
    if let Some(packages) = shipment.packages {
        out.leaf("cbc:TotalTransportHandlingUnitQuantity", &[], &packages.to_string())?;
    }

    out.open("cac:ShipmentStage", &[])?;
    out.leaf(
        "cbc:TransportModeCode",
        &[
            ("listName", "Modalidad de traslado"),
            ("listAgencyName", SUNAT_AGENCY),
            ("listURI", CATALOG_18_URI),
        ],
        shipment.mode.code(),
    )?;
    out.open("cac:TransitPeriod", &[])?;
    out.leaf(
        "cbc:StartDate",
        &[],
        &shipment.start_date.format("%Y-%m-%d").to_string(),
    )?;
    out.close("cac:TransitPeriod")?;
    match shipment.mode {
        TransportMode::Public => {
            if let Some(carrier) = shipment.carrier.as_ref() {
                write_carrier(out, carrier)?;
            }
        }
        TransportMode::Private => {
            for driver in &shipment.drivers {
                write_driver(out, driver)?;
            }
        }
    }
    out.close("cac:ShipmentStage")?;

    out.open("cac:Delivery", &[])?;
    write_address(out, "cac:DeliveryAddress", &shipment.arrival)?;
    out.open("cac:Despatch", &[])?;
    write_address(out, "cac:DespatchAddress", &shipment.departure)?;
    out.close("cac:Despatch")?;
    out.close("cac:Delivery")?;

    if let Some(plate) = shipment.vehicle_plate.as_deref() {
        out.open("cac:TransportHandlingUnit", &[])?;
        out.open("cac:TransportEquipment", &[])?;
        out.leaf("cbc:ID", &[], plate)?;
        out.close("cac:TransportEquipment")?;
        out.close("cac:TransportHandlingUnit")?;
    }
    out.close("cac:Shipment")
}

fn write_carrier(out: &mut XmlOut, carrier: &Carrier) -> Result<()> {
    out.open("cac:CarrierParty", &[])?;
    out.open("cac:PartyIdentification", &[])?;
    out.leaf("cbc:ID", &[("schemeID", carrier.doc_type.as_str())], &carrier.doc_number)?;
    out.close("cac:PartyIdentification")?;
    out.open("cac:PartyLegalEntity", &[])?;
    out.text_leaf("cbc:RegistrationName", &carrier.name)?;
    if let Some(mtc) = carrier.mtc_registration.as_deref() {
        out.leaf("cbc:CompanyID", &[], mtc)?;
    }
    out.close("cac:PartyLegalEntity")?;
    out.close("cac:CarrierParty")
}

fn write_driver(out: &mut XmlOut, driver: &Driver) -> Result<()> {
    out.open("cac:DriverPerson", &[])?;
    out.leaf("cbc:ID", &identity_attrs(&driver.doc_type), &driver.doc_number)?;
    out.text_leaf("cbc:FirstName", &driver.first_name)?;
    out.text_leaf("cbc:FamilyName", &driver.last_name)?;
    out.leaf("cbc:JobTitle", &[], &driver.role)?;
    out.open("cac:IdentityDocumentReference", &[])?;
    out.leaf("cbc:ID", &[], &driver.license)?;
    out.close("cac:IdentityDocumentReference")?;
    out.close("cac:DriverPerson")
}

fn write_address(out: &mut XmlOut, tag: &str, address: &Address) -> Result<()> {
    out.open(tag, &[])?;
    out.leaf(
        "cbc:ID",
        &[("schemeAgencyName", "PE:INEI"), ("schemeName", "Ubigeos")],
        &address.ubigeo,
    )?;
    out.open("cac:AddressLine", &[])?;
    out.text_leaf("cbc:Line", &address.line)?;
    out.close("cac:AddressLine")?;
    out.close(tag)
}

fn write_line(out: &mut XmlOut, line_id: usize, detail: &DespatchDetail) -> Result<()> {
    let line_id = line_id.to_string();
    out.open("cac:DespatchLine", &[])?;
    out.leaf("cbc:ID", &[], &line_id)?;
    out.leaf(
        "cbc:DeliveredQuantity",
        &[
            ("unitCode", detail.unit.as_str()),
            ("unitCodeListID", "UN/ECE rec 20"),
            ("unitCodeListAgencyName", "United Nations Economic Commission for Europe"),
        ],
        &decimal(detail.quantity, 10),
    )?;
    out.open("cac:OrderLineReference", &[])?;
    out.leaf("cbc:LineID", &[], &line_id)?;
    out.close("cac:OrderLineReference")?;
    out.open("cac:Item", &[])?;
    out.text_leaf("cbc:Description", &detail.description)?;
    if let Some(code) = detail.code.as_deref() {
        out.open("cac:SellersItemIdentification", &[])?;
        out.leaf("cbc:ID", &[], code)?;
        out.close("cac:SellersItemIdentification")?;
    }
    if let Some(code) = detail.sunat_product_code.as_deref() {
        out.open("cac:CommodityClassification", &[])?;
        out.leaf(
            "cbc:ItemClassificationCode",
            &[
                ("listID", "UNSPSC"),
                ("listAgencyName", "GS1 US"),
                ("listName", "Item Classification"),
                ("listURI", CATALOG_25_URI),
            ],
            code,
        )?;
        out.close("cac:CommodityClassification")?;
    }
    out.close("cac:Item")?;
    out.close("cac:DespatchLine")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Shipment;
    use chrono::NaiveDate;

    fn despatch() -> Despatch {
        Despatch {
            series: "T001".into(),
            correlative: "42".into(),
            issued_at: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(10, 15, 0)
                .unwrap(),
            note: Some("Entrega en almacén".into()),
            company: Company {
                ruc: "20123456789".into(),
                legal_name: "EMPRESA DEMO S.A.C.".into(),
                trade_name: None,
            },
            recipient: Party {
                doc_type: "6".into(),
                doc_number: "20987654321".into(),
                name: "CLIENTE & ASOCIADOS".into(),
            },
            shipment: Shipment {
                reason_description: Some("VENTA".into()),
                mode: TransportMode::Private,
                start_date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
                gross_weight: 12.5,
                departure: Address {
                    ubigeo: "150101".into(),
                    line: "AV. LIMA 123".into(),
                },
                arrival: Address {
                    ubigeo: "150203".into(),
                    line: "JR. AREQUIPA 456".into(),
                },
                vehicle_plate: Some("ABC123".into()),
                drivers: vec![Driver {
                    role: "Principal".into(),
                    doc_type: "1".into(),
                    doc_number: "45678912".into(),
                    license: "Q45678912".into(),
                    first_name: "JUAN".into(),
                    last_name: "PEREZ".into(),
                }],
                ..Shipment::default()
            },
            details: vec![DespatchDetail {
                quantity: 2.0,
                unit: "NIU".into(),
                description: "CAJA DE CARTON".into(),
                code: Some("P001".into()),
                sunat_product_code: None,
            }],
            ..Despatch::default()
        }
    }

    #[test]
    fn builds_despatch_advice_header() {
        let xml = DespatchBuilder
            .build(&despatch(), &BuilderOptions::default())
            .expect("xml");
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\""));
        assert!(xml.contains("<ext:ExtensionContent/>"));
        assert!(xml.contains("<cbc:ID>T001-42</cbc:ID>"));
        assert!(xml.contains("<cbc:IssueDate>2024-03-01</cbc:IssueDate>"));
        assert!(xml.contains("<cbc:IssueTime>10:15:00</cbc:IssueTime>"));
        assert!(xml.contains(">09</cbc:DespatchAdviceTypeCode>"));
        assert!(xml.contains("<cbc:URI>#SignatureGRE</cbc:URI>"));
    }

    #[test]
    fn builds_private_transport_shipment() {
        let xml = DespatchBuilder
            .build(&despatch(), &BuilderOptions::default())
            .expect("xml");
        assert!(xml.contains(">02</cbc:TransportModeCode>"));
        assert!(xml.contains("<cbc:StartDate>2024-03-02</cbc:StartDate>"));
        assert!(xml.contains(
            "<cbc:GrossWeightMeasure unitCode=\"KGM\">12.5</cbc:GrossWeightMeasure>"
        ));
        assert!(xml.contains("<cac:DriverPerson>"));
        assert!(!xml.contains("<cac:CarrierParty>"));
        assert!(xml.contains("<cbc:ID>ABC123</cbc:ID>"));
        assert!(xml.contains(">2</cbc:DeliveredQuantity>"));
    }

    #[test]
    fn public_transport_writes_carrier_only() {
        let mut despatch = despatch();
        despatch.shipment.mode = TransportMode::Public;
        despatch.shipment.carrier = Some(Carrier {
            doc_type: "6".into(),
            doc_number: "20555555555".into(),
            name: "TRANSPORTES SAC".into(),
            mtc_registration: Some("MTC001".into()),
        });
        let xml = DespatchBuilder
            .build(&despatch, &BuilderOptions::default())
            .expect("xml");
        assert!(xml.contains("<cac:CarrierParty>"));
        assert!(xml.contains("<cbc:CompanyID>MTC001</cbc:CompanyID>"));
        assert!(!xml.contains("<cac:DriverPerson>"));
    }

    #[test]
    fn autoescape_controls_free_text() {
        let raw = DespatchBuilder
            .build(&despatch(), &BuilderOptions::default())
            .expect("xml");
        assert!(raw.contains("<![CDATA[CLIENTE & ASOCIADOS]]>"));

        let mut options = BuilderOptions::default();
        options.set(BuilderOptions::AUTOESCAPE, true);
        let escaped = DespatchBuilder.build(&despatch(), &options).expect("xml");
        assert!(escaped.contains("CLIENTE &amp; ASOCIADOS"));
        assert!(!escaped.contains("CDATA"));
    }
}
