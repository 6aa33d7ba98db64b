use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::definitions::device_signed::DeviceSigned;
use crate::definitions::encrypted::EncryptedDocuments;
use crate::definitions::helpers::{NonEmptyMap, NonEmptyVec};
use crate::definitions::issuer_signed::IssuerSigned;
use crate::definitions::zk::ZkDocument;

/// The mdoc's response to a device request.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Documents>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zk_documents: Option<ZkDocuments>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_documents: Option<EncryptedDocuments>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_errors: Option<DocumentErrors>,
    pub status: Status,
    // Number of successful verifications of this response. Parsed responses
    // start at zero and must be verified before documents are released.
    #[serde(skip, default)]
    verified: AtomicU32,
}

pub type Documents = NonEmptyVec<Document>;
pub type ZkDocuments = NonEmptyVec<ZkDocument>;
pub type DocumentErrors = NonEmptyVec<DocumentError>;
/// doc_type mapped to the reason the document was not returned.
pub type DocumentError = BTreeMap<String, DocumentErrorCode>;
/// namespace, then element identifier, mapped to the reason the element was
/// not returned.
pub type Errors = NonEmptyMap<String, NonEmptyMap<String, DocumentErrorCode>>;

/// A single presented document.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub doc_type: String,
    pub issuer_signed: IssuerSigned,
    pub device_signed: DeviceSigned,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Errors>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(try_from = "u64", into = "u64")]
pub enum Status {
    #[default]
    OK,
    GeneralError,
    CborDecodingError,
    CborValidationError,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "i128", into = "i128")]
pub enum DocumentErrorCode {
    DataNotReturned,
    ApplicationSpecific(i128),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("unrecognised status code: {0}")]
    UnrecognisedStatus(u64),
    #[error("unrecognised document error code: {0}")]
    UnrecognisedErrorCode(i128),
    #[error("verify() not yet called")]
    NotYetVerified,
}

impl DeviceResponse {
    pub const VERSION_1_0: &'static str = "1.0";
    pub const VERSION_1_1: &'static str = "1.1";

    /// The version required to carry the given document sets: encrypted and
    /// zero-knowledge documents were introduced in "1.1".
    pub fn select_version(
        zk_documents: Option<&ZkDocuments>,
        encrypted_documents: Option<&EncryptedDocuments>,
    ) -> &'static str {
        if zk_documents.is_some() || encrypted_documents.is_some() {
            Self::VERSION_1_1
        } else {
            Self::VERSION_1_0
        }
    }

    /// Construct a locally-built response. Built responses do not require
    /// verification before their documents are accessed.
    pub fn new(
        documents: Option<Documents>,
        zk_documents: Option<ZkDocuments>,
        encrypted_documents: Option<EncryptedDocuments>,
        document_errors: Option<DocumentErrors>,
        status: Status,
    ) -> Self {
        let version =
            Self::select_version(zk_documents.as_ref(), encrypted_documents.as_ref()).to_string();
        Self {
            version,
            documents,
            zk_documents,
            encrypted_documents,
            document_errors,
            status,
            verified: AtomicU32::new(1),
        }
    }

    /// The presented documents, only available after a successful [verify].
    ///
    /// [verify]: crate::presentation::authentication
    pub fn documents(&self) -> Result<Option<&Documents>, Error> {
        if self.verified.load(Ordering::Relaxed) == 0 {
            return Err(Error::NotYetVerified);
        }
        Ok(self.documents.as_ref())
    }

    pub fn zk_documents(&self) -> Result<Option<&ZkDocuments>, Error> {
        if self.verified.load(Ordering::Relaxed) == 0 {
            return Err(Error::NotYetVerified);
        }
        Ok(self.zk_documents.as_ref())
    }

    pub(crate) fn mark_verified(&self) {
        self.verified.fetch_add(1, Ordering::Relaxed);
    }
}

impl Clone for DeviceResponse {
    fn clone(&self) -> Self {
        Self {
            version: self.version.clone(),
            documents: self.documents.clone(),
            zk_documents: self.zk_documents.clone(),
            encrypted_documents: self.encrypted_documents.clone(),
            document_errors: self.document_errors.clone(),
            status: self.status,
            verified: AtomicU32::new(self.verified.load(Ordering::Relaxed)),
        }
    }
}

impl From<Status> for u64 {
    fn from(s: Status) -> u64 {
        match s {
            Status::OK => 0,
            Status::GeneralError => 10,
            Status::CborDecodingError => 11,
            Status::CborValidationError => 12,
        }
    }
}

impl TryFrom<u64> for Status {
    type Error = Error;

    fn try_from(n: u64) -> Result<Status, Error> {
        match n {
            0 => Ok(Status::OK),
            10 => Ok(Status::GeneralError),
            11 => Ok(Status::CborDecodingError),
            12 => Ok(Status::CborValidationError),
            _ => Err(Error::UnrecognisedStatus(n)),
        }
    }
}

impl From<DocumentErrorCode> for i128 {
    fn from(c: DocumentErrorCode) -> i128 {
        match c {
            DocumentErrorCode::DataNotReturned => 0,
            DocumentErrorCode::ApplicationSpecific(i) => i,
        }
    }
}

impl TryFrom<i128> for DocumentErrorCode {
    type Error = Error;

    fn try_from(n: i128) -> Result<DocumentErrorCode, Error> {
        match n {
            0 => Ok(DocumentErrorCode::DataNotReturned),
            i if i < 0 => Ok(DocumentErrorCode::ApplicationSpecific(i)),
            _ => Err(Error::UnrecognisedErrorCode(n)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;
    use crate::definitions::helpers::Tag24;
    use crate::definitions::validity_info::Tag0DateTime;
    use crate::definitions::x509::X5Chain;
    use crate::definitions::zk::ZkDocumentData;

    fn zk_document() -> ZkDocument {
        let x5chain = X5Chain::builder()
            .with_pem(include_bytes!("../../test/issuance/ds-cert.pem"))
            .unwrap()
            .build()
            .unwrap();
        ZkDocument {
            zk_document_data: Tag24::new(ZkDocumentData {
                doc_type: "org.iso.18013.5.1.mDL".to_string(),
                timestamp: Tag0DateTime(time::macros::datetime!(2026-01-01 00:00 UTC)),
                issuer_signed: BTreeMap::new(),
                x5chain,
            })
            .unwrap(),
            proof: vec![0u8; 32].into(),
        }
    }

    fn encrypted_documents() -> EncryptedDocuments {
        EncryptedDocuments {
            enc: vec![0u8; 65].into(),
            ciphertext: vec![0u8; 32].into(),
            doc_request_id: 1,
        }
    }

    #[test]
    fn status_codes() {
        assert_eq!(u64::from(Status::OK), 0);
        assert_eq!(u64::from(Status::GeneralError), 10);
        assert_eq!(u64::from(Status::CborDecodingError), 11);
        assert_eq!(u64::from(Status::CborValidationError), 12);
        assert!(Status::try_from(1).is_err());
    }

    #[test]
    fn document_error_codes() {
        assert_eq!(i128::from(DocumentErrorCode::DataNotReturned), 0);
        assert_eq!(
            DocumentErrorCode::try_from(-7).unwrap(),
            DocumentErrorCode::ApplicationSpecific(-7)
        );
        // Positive codes are reserved.
        assert!(DocumentErrorCode::try_from(7).is_err());
    }

    #[test]
    fn version_selection() {
        assert_eq!(DeviceResponse::select_version(None, None), "1.0");
        let response = DeviceResponse::new(None, None, None, None, Status::OK);
        assert_eq!(response.version, "1.0");

        // Zero-knowledge and encrypted document sets each require "1.1".
        let zk_documents = NonEmptyVec::new(zk_document());
        assert_eq!(
            DeviceResponse::select_version(Some(&zk_documents), None),
            "1.1"
        );
        let response = DeviceResponse::new(None, Some(zk_documents), None, None, Status::OK);
        assert_eq!(response.version, "1.1");

        let encrypted = encrypted_documents();
        assert_eq!(DeviceResponse::select_version(None, Some(&encrypted)), "1.1");
        let response = DeviceResponse::new(None, None, Some(encrypted), None, Status::OK);
        assert_eq!(response.version, "1.1");
    }

    #[test]
    fn parsed_response_is_gated_until_verified() {
        let response = DeviceResponse::new(None, None, None, None, Status::OK);
        let bytes = cbor::to_vec(&response).unwrap();
        let parsed: DeviceResponse = cbor::from_slice(&bytes).unwrap();
        assert!(matches!(parsed.documents(), Err(Error::NotYetVerified)));
        parsed.mark_verified();
        assert!(parsed.documents().is_ok());
    }
}
