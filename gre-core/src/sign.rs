//! Enveloped XML-DSig signing of built documents.
use crate::builder::constants::{DS_NS, EXT_NS, SIGNATURE_ID};
use base64ct::{Base64, Encoding};
use k256::ecdsa::{signature::Signer, Signature, SigningKey, VerifyingKey};
use k256::pkcs8::DecodePrivateKey;
use libxml::{
    parser::Parser,
    tree::{c14n, Document, Node},
    xpath,
};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::signature::SignatureEncoding;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_cert::{
    der::{Decode, DecodePem, Encode},
    spki::ObjectIdentifier,
    Certificate,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    #[error("no certificate has been loaded into the signer")]
    MissingCertificate,
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("private key error: {0}")]
    Key(String),
    #[error("private key does not match the certificate public key")]
    KeyMismatch,
    #[error("XML error: {0}")]
    Xml(String),
    #[error("signature error: {0}")]
    Signature(String),
}

/// Produces digitally signed XML from unsigned XML.
///
/// Certificate material is set once and used for every later signature.
pub trait XmlSigner: Send + Sync {
    /// Load certificate material, replacing any previous one.
    fn set_certificate(&mut self, material: &str) -> Result<(), SigningError>;

    fn has_certificate(&self) -> bool;

    fn sign_xml(&self, xml: &str) -> Result<String, SigningError>;
}

const C14N_EXCLUSIVE: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";
const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// Private key of a signing identity; the variant picks the `SignatureMethod`.
enum PrivateKey {
    Ec(SigningKey),
    Rsa(rsa::pkcs1v15::SigningKey<Sha256>),
}

impl PrivateKey {
    fn from_pkcs8_der(algorithm: KeyAlgorithm, der: &[u8]) -> Result<Self, SigningError> {
        match algorithm {
            KeyAlgorithm::Ec => SigningKey::from_pkcs8_der(der).map(Self::Ec).map_err(key_error),
            KeyAlgorithm::Rsa => RsaPrivateKey::from_pkcs8_der(der)
                .map(Self::rsa)
                .map_err(key_error),
        }
    }

    fn from_pem(algorithm: KeyAlgorithm, material: &str) -> Result<Self, SigningError> {
        if let Some(block) = pem_block(material, "PRIVATE KEY") {
            return match algorithm {
                KeyAlgorithm::Ec => SigningKey::from_pkcs8_pem(block)
                    .map(Self::Ec)
                    .map_err(key_error),
                KeyAlgorithm::Rsa => RsaPrivateKey::from_pkcs8_pem(block)
                    .map(Self::rsa)
                    .map_err(key_error),
            };
        }
        match algorithm {
            KeyAlgorithm::Ec => {
                let block = pem_block(material, "EC PRIVATE KEY")
                    .ok_or_else(|| SigningError::Key("no PRIVATE KEY block found".into()))?;
                let secret = k256::SecretKey::from_sec1_pem(block).map_err(key_error)?;
                Ok(Self::Ec(SigningKey::from(secret)))
            }
            KeyAlgorithm::Rsa => {
                let block = pem_block(material, "RSA PRIVATE KEY")
                    .ok_or_else(|| SigningError::Key("no PRIVATE KEY block found".into()))?;
                RsaPrivateKey::from_pkcs1_pem(block)
                    .map(Self::rsa)
                    .map_err(key_error)
            }
        }
    }

    fn rsa(key: RsaPrivateKey) -> Self {
        Self::Rsa(rsa::pkcs1v15::SigningKey::new(key))
    }

    fn signature_method(&self) -> &'static str {
        match self {
            Self::Ec(_) => ECDSA_SHA256,
            Self::Rsa(_) => RSA_SHA256,
        }
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SigningError> {
        match self {
            Self::Ec(key) => {
                let signature: Signature = key
                    .try_sign(message)
                    .map_err(|e| SigningError::Signature(e.to_string()))?;
                Ok(signature.to_bytes().to_vec())
            }
            Self::Rsa(key) => key
                .try_sign(message)
                .map(|signature| signature.to_vec())
                .map_err(|e| SigningError::Signature(e.to_string())),
        }
    }
}

fn key_error(e: impl std::fmt::Display) -> SigningError {
    SigningError::Key(format!("parse error: {e}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAlgorithm {
    Ec,
    Rsa,
}

impl KeyAlgorithm {
    fn of(certificate: &Certificate) -> Self {
        if certificate.tbs_certificate.subject_public_key_info.algorithm.oid == RSA_ENCRYPTION {
            Self::Rsa
        } else {
            Self::Ec
        }
    }
}

struct Identity {
    certificate: Certificate,
    key: PrivateKey,
}

impl Identity {
    fn new(certificate: Certificate, key: PrivateKey) -> Result<Self, SigningError> {
        let spki = certificate
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .as_bytes()
            .ok_or_else(|| SigningError::Certificate("malformed public key bit string".into()))?;
        let matches = match &key {
            PrivateKey::Ec(key) => {
                let cert_key = VerifyingKey::from_sec1_bytes(spki).map_err(|e| {
                    SigningError::Certificate(format!("unsupported public key: {e}"))
                })?;
                &cert_key == key.verifying_key()
            }
            PrivateKey::Rsa(key) => {
                let cert_key = RsaPublicKey::from_pkcs1_der(spki).map_err(|e| {
                    SigningError::Certificate(format!("unsupported public key: {e}"))
                })?;
                let private: &RsaPrivateKey = key.as_ref();
                cert_key == RsaPublicKey::from(private)
            }
        };
        if !matches {
            return Err(SigningError::KeyMismatch);
        }
        Ok(Self { certificate, key })
    }
}

/// Enveloped XML-DSig signer with SHA-256 digests and exclusive c14n.
///
/// RSA certificates sign with RSA-SHA256 (PKCS#1 v1.5), EC certificates with
/// ECDSA secp256k1.
///
/// The `ds:Signature` element is placed inside the first `ext:ExtensionContent`
/// when the document has one, otherwise appended to the root element.
///
/// # Examples
/// ```rust
/// use gre_core::sign::{DsigSigner, SigningError, XmlSigner};
///
/// let signer = DsigSigner::new();
/// assert!(!signer.has_certificate());
/// assert_eq!(signer.sign_xml("<a/>"), Err(SigningError::MissingCertificate));
/// ```
#[derive(Default)]
pub struct DsigSigner {
    identity: Option<Identity>,
}

impl std::fmt::Debug for DsigSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DsigSigner")
            .field(
                "subject",
                &self
                    .certificate()
                    .map(|cert| cert.tbs_certificate.subject.to_string()),
            )
            .finish()
    }
}

impl DsigSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_der(cert_der: &[u8], private_key_der: &[u8]) -> Result<Self, SigningError> {
        let certificate = Certificate::from_der(cert_der)
            .map_err(|e| SigningError::Certificate(format!("parse error: {e}")))?;
        let key = PrivateKey::from_pkcs8_der(KeyAlgorithm::of(&certificate), private_key_der)?;
        Ok(Self {
            identity: Some(Identity::new(certificate, key)?),
        })
    }

    pub fn from_pem(cert_pem: &str, private_key_pem: &str) -> Result<Self, SigningError> {
        let mut signer = Self::new();
        signer.identity = Some(identity_from_pem(cert_pem, private_key_pem)?);
        Ok(signer)
    }

    pub fn certificate(&self) -> Option<&Certificate> {
        self.identity.as_ref().map(|identity| &identity.certificate)
    }
}

impl XmlSigner for DsigSigner {
    /// `material` is a PEM bundle with one certificate and its private key
    /// (`PRIVATE KEY` PKCS#8, `RSA PRIVATE KEY` or `EC PRIVATE KEY`), in any order.
    fn set_certificate(&mut self, material: &str) -> Result<(), SigningError> {
        self.identity = Some(identity_from_pem(material, material)?);
        Ok(())
    }

    fn has_certificate(&self) -> bool {
        self.identity.is_some()
    }

    fn sign_xml(&self, xml: &str) -> Result<String, SigningError> {
        let identity = self
            .identity
            .as_ref()
            .ok_or(SigningError::MissingCertificate)?;
        let mut doc = Parser::default()
            .parse_string(xml)
            .map_err(|e| SigningError::Xml(format!("parse error: {e:?}")))?;
        let ctx = xpath_context(&doc)?;
        for mut previous in nodes(&ctx, "//ds:Signature")? {
            previous.unlink();
        }

        let digest = document_digest_base64(&doc)?;
        let signed_info = signed_info_xml(identity.key.signature_method(), &digest);
        let signature = sign_signed_info(&identity.key, &signed_info)?;
        let cert_der = identity
            .certificate
            .to_der()
            .map_err(|e| SigningError::Certificate(format!("DER encoding error: {e}")))?;
        let fragment = signature_xml(&signed_info, &signature, &Base64::encode_string(&cert_der));

        let mut signature_node = import_fragment(&mut doc, &fragment)?;
        let mut parent = match nodes(&ctx, "//ext:ExtensionContent")?.into_iter().next() {
            Some(content) => content,
            None => doc
                .get_root_element()
                .ok_or_else(|| SigningError::Xml("missing root element".into()))?,
        };
        parent
            .add_child(&mut signature_node)
            .map_err(|e| SigningError::Xml(e.to_string()))?;

        Ok(doc.to_string())
    }
}

fn identity_from_pem(cert_pem: &str, key_pem: &str) -> Result<Identity, SigningError> {
    let cert_block = pem_block(cert_pem, "CERTIFICATE")
        .ok_or_else(|| SigningError::Certificate("no CERTIFICATE block found".into()))?;
    let certificate = Certificate::from_pem(cert_block.as_bytes())
        .map_err(|e| SigningError::Certificate(format!("parse error: {e}")))?;

    let key = PrivateKey::from_pem(KeyAlgorithm::of(&certificate), key_pem)?;
    Identity::new(certificate, key)
}

/// Slice of `material` holding the first PEM block with the given label.
fn pem_block<'a>(material: &'a str, label: &str) -> Option<&'a str> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let start = material.find(&begin)?;
    let stop = start + material[start..].find(&end)? + end.len();
    Some(&material[start..stop])
}

fn xpath_context(doc: &Document) -> Result<xpath::Context, SigningError> {
    let ctx = xpath::Context::new(doc)
        .map_err(|e| SigningError::Xml(format!("XPath context error: {e:?}")))?;
    ctx.register_namespace("ds", DS_NS)
        .map_err(|e| SigningError::Xml(format!("XPath context error: {e:?}")))?;
    ctx.register_namespace("ext", EXT_NS)
        .map_err(|e| SigningError::Xml(format!("XPath context error: {e:?}")))?;
    Ok(ctx)
}

fn nodes(ctx: &xpath::Context, path: &str) -> Result<Vec<Node>, SigningError> {
    Ok(ctx
        .evaluate(path)
        .map_err(|e| SigningError::Xml(format!("XPath error for {path}: {e:?}")))?
        .get_nodes_as_vec())
}

fn canonicalize(doc: &Document) -> Result<String, SigningError> {
    let options = c14n::CanonicalizationOptions {
        mode: c14n::CanonicalizationMode::ExclusiveCanonical1_0,
        inclusive_ns_prefixes: vec![],
        with_comments: false,
    };
    doc.canonicalize(options, None)
        .map_err(|e| SigningError::Xml(format!("failed to canonicalize: {e:?}")))
}

fn document_digest_base64(doc: &Document) -> Result<String, SigningError> {
    let canonical = canonicalize(doc)?;
    Ok(Base64::encode_string(&Sha256::digest(canonical.as_bytes())))
}

fn signed_info_xml(method: &str, digest_b64: &str) -> String {
    format!(
        concat!(
            "<ds:SignedInfo xmlns:ds=\"{ds}\">",
            "<ds:CanonicalizationMethod Algorithm=\"{c14n}\"/>",
            "<ds:SignatureMethod Algorithm=\"{method}\"/>",
            "<ds:Reference URI=\"\">",
            "<ds:Transforms>",
            "<ds:Transform Algorithm=\"{enveloped}\"/>",
            "<ds:Transform Algorithm=\"{c14n}\"/>",
            "</ds:Transforms>",
            "<ds:DigestMethod Algorithm=\"{digest_method}\"/>",
            "<ds:DigestValue>{digest}</ds:DigestValue>",
            "</ds:Reference>",
            "</ds:SignedInfo>"
        ),
        ds = DS_NS,
        c14n = C14N_EXCLUSIVE,
        method = method,
        enveloped = ENVELOPED_SIGNATURE,
        digest_method = SHA256,
        digest = digest_b64,
    )
}

/// Canonical bytes of a standalone `ds:SignedInfo`.
fn canonical_signed_info(signed_info: &str) -> Result<String, SigningError> {
    let doc = Parser::default()
        .parse_string(signed_info)
        .map_err(|e| SigningError::Xml(format!("SignedInfo parse error: {e:?}")))?;
    canonicalize(&doc)
}

fn sign_signed_info(key: &PrivateKey, signed_info: &str) -> Result<String, SigningError> {
    let canonical = canonical_signed_info(signed_info)?;
    Ok(Base64::encode_string(&key.sign(canonical.as_bytes())?))
}

fn signature_xml(signed_info: &str, signature_b64: &str, cert_b64: &str) -> String {
    // SignedInfo keeps its own xmlns:ds so it canonicalizes the same in place and alone
    format!(
        "<ds:Signature xmlns:ds=\"{DS_NS}\" Id=\"{SIGNATURE_ID}\">{signed_info}\
         <ds:SignatureValue>{signature_b64}</ds:SignatureValue>\
         <ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert_b64}</ds:X509Certificate>\
         </ds:X509Data></ds:KeyInfo></ds:Signature>"
    )
}

fn import_fragment(doc: &mut Document, xml: &str) -> Result<Node, SigningError> {
    let fragment = Parser::default()
        .parse_string(xml)
        .map_err(|e| SigningError::Xml(format!("fragment parse error: {e:?}")))?;
    let mut node = fragment
        .get_root_element()
        .ok_or_else(|| SigningError::Xml("missing fragment root".into()))?;
    node.unlink();
    doc.import_node(&mut node)
        .map_err(|_| SigningError::Xml("failed to import fragment".into()))
}
