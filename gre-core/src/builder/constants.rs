pub(crate) const DESPATCH_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:DespatchAdvice-2";
pub(crate) const CBC_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";
pub(crate) const CAC_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2";
pub(crate) const EXT_NS: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonExtensionComponents-2";
pub(crate) const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// `Id` of the `ds:Signature` element, referenced from `cac:Signature`.
pub(crate) const SIGNATURE_ID: &str = "SignatureGRE";

pub(crate) const SUNAT_AGENCY: &str = "PE:SUNAT";
pub(crate) const CATALOG_01_URI: &str = "urn:pe:gob:sunat:cpe:see:gem:catalogos:catalogo01";
pub(crate) const CATALOG_06_URI: &str = "urn:pe:gob:sunat:cpe:see:gem:catalogos:catalogo06";
pub(crate) const CATALOG_18_URI: &str = "urn:pe:gob:sunat:cpe:see:gem:catalogos:catalogo18";
pub(crate) const CATALOG_20_URI: &str = "urn:pe:gob:sunat:cpe:see:gem:catalogos:catalogo20";
pub(crate) const CATALOG_25_URI: &str = "urn:pe:gob:sunat:cpe:see:gem:catalogos:catalogo25";
