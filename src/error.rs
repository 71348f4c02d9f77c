//! LDAP result codes, their descriptions and the error type returned by every session operation.

use thiserror::Error;

// LDAPv3 result codes (RFC 4511 and extensions)
pub const LDAP_SUCCESS: i32 = 0;
pub const LDAP_OPERATIONS_ERROR: i32 = 1;
pub const LDAP_PROTOCOL_ERROR: i32 = 2;
pub const LDAP_TIMELIMIT_EXCEEDED: i32 = 3;
pub const LDAP_SIZELIMIT_EXCEEDED: i32 = 4;
pub const LDAP_COMPARE_FALSE: i32 = 5;
pub const LDAP_COMPARE_TRUE: i32 = 6;
pub const LDAP_AUTH_METHOD_NOT_SUPPORTED: i32 = 7;
pub const LDAP_STRONG_AUTH_REQUIRED: i32 = 8;
pub const LDAP_REFERRAL: i32 = 10;
pub const LDAP_ADMINLIMIT_EXCEEDED: i32 = 11;
pub const LDAP_UNAVAILABLE_CRITICAL_EXTENSION: i32 = 12;
pub const LDAP_CONFIDENTIALITY_REQUIRED: i32 = 13;
pub const LDAP_SASL_BIND_IN_PROGRESS: i32 = 14;
pub const LDAP_NO_SUCH_ATTRIBUTE: i32 = 16;
pub const LDAP_UNDEFINED_TYPE: i32 = 17;
pub const LDAP_INAPPROPRIATE_MATCHING: i32 = 18;
pub const LDAP_CONSTRAINT_VIOLATION: i32 = 19;
pub const LDAP_TYPE_OR_VALUE_EXISTS: i32 = 20;
pub const LDAP_INVALID_SYNTAX: i32 = 21;
pub const LDAP_NO_SUCH_OBJECT: i32 = 32;
pub const LDAP_ALIAS_PROBLEM: i32 = 33;
pub const LDAP_INVALID_DN_SYNTAX: i32 = 34;
pub const LDAP_IS_LEAF: i32 = 35;
pub const LDAP_ALIAS_DEREF_PROBLEM: i32 = 36;
pub const LDAP_X_PROXY_AUTHZ_FAILURE: i32 = 47;
pub const LDAP_INAPPROPRIATE_AUTH: i32 = 48;
pub const LDAP_INVALID_CREDENTIALS: i32 = 49;
pub const LDAP_INSUFFICIENT_ACCESS: i32 = 50;
pub const LDAP_BUSY: i32 = 51;
pub const LDAP_UNAVAILABLE: i32 = 52;
pub const LDAP_UNWILLING_TO_PERFORM: i32 = 53;
pub const LDAP_LOOP_DETECT: i32 = 54;
pub const LDAP_NAMING_VIOLATION: i32 = 64;
pub const LDAP_OBJECT_CLASS_VIOLATION: i32 = 65;
pub const LDAP_NOT_ALLOWED_ON_NONLEAF: i32 = 66;
pub const LDAP_NOT_ALLOWED_ON_RDN: i32 = 67;
pub const LDAP_ALREADY_EXISTS: i32 = 68;
pub const LDAP_NO_OBJECT_CLASS_MODS: i32 = 69;
pub const LDAP_RESULTS_TOO_LARGE: i32 = 70;
pub const LDAP_AFFECTS_MULTIPLE_DSAS: i32 = 71;
pub const LDAP_VLV_ERROR: i32 = 76;
pub const LDAP_OTHER: i32 = 80;
pub const LDAP_CANCELLED: i32 = 118;
pub const LDAP_NO_SUCH_OPERATION: i32 = 119;
pub const LDAP_TOO_LATE: i32 = 120;
pub const LDAP_CANNOT_CANCEL: i32 = 121;
pub const LDAP_ASSERTION_FAILED: i32 = 122;
pub const LDAP_PROXIED_AUTHORIZATION_DENIED: i32 = 123;
pub const LDAP_SYNC_REFRESH_REQUIRED: i32 = 4096;

// Client-side codes (never sent by a server)
pub const LDAP_SERVER_DOWN: i32 = -1;
pub const LDAP_LOCAL_ERROR: i32 = -2;
pub const LDAP_ENCODING_ERROR: i32 = -3;
pub const LDAP_DECODING_ERROR: i32 = -4;
pub const LDAP_TIMEOUT: i32 = -5;
pub const LDAP_AUTH_UNKNOWN: i32 = -6;
pub const LDAP_FILTER_ERROR: i32 = -7;
pub const LDAP_USER_CANCELLED: i32 = -8;
pub const LDAP_PARAM_ERROR: i32 = -9;
pub const LDAP_NO_MEMORY: i32 = -10;
pub const LDAP_CONNECT_ERROR: i32 = -11;
pub const LDAP_NOT_SUPPORTED: i32 = -12;
pub const LDAP_CONTROL_NOT_FOUND: i32 = -13;
pub const LDAP_NO_RESULTS_RETURNED: i32 = -14;
pub const LDAP_MORE_RESULTS_TO_RETURN: i32 = -15;
pub const LDAP_CLIENT_LOOP: i32 = -16;
pub const LDAP_REFERRAL_LIMIT_EXCEEDED: i32 = -17;
pub const LDAP_X_CONNECTING: i32 = -18;

/// Human-readable text for a result code. Unknown codes get a generic description.
pub fn describe(code: i32) -> String {
    let text = match code {
        LDAP_SUCCESS => "Success",
        LDAP_OPERATIONS_ERROR => "Operations error",
        LDAP_PROTOCOL_ERROR => "Protocol error",
        LDAP_TIMELIMIT_EXCEEDED => "Time limit exceeded",
        LDAP_SIZELIMIT_EXCEEDED => "Size limit exceeded",
        LDAP_COMPARE_FALSE => "Compare False",
        LDAP_COMPARE_TRUE => "Compare True",
        LDAP_AUTH_METHOD_NOT_SUPPORTED => "Authentication method not supported",
        LDAP_STRONG_AUTH_REQUIRED => "Strong(er) authentication required",
        LDAP_REFERRAL => "Referral",
        LDAP_ADMINLIMIT_EXCEEDED => "Administrative limit exceeded",
        LDAP_UNAVAILABLE_CRITICAL_EXTENSION => "Critical extension is unavailable",
        LDAP_CONFIDENTIALITY_REQUIRED => "Confidentiality required",
        LDAP_SASL_BIND_IN_PROGRESS => "SASL bind in progress",
        LDAP_NO_SUCH_ATTRIBUTE => "No such attribute",
        LDAP_UNDEFINED_TYPE => "Undefined attribute type",
        LDAP_INAPPROPRIATE_MATCHING => "Inappropriate matching",
        LDAP_CONSTRAINT_VIOLATION => "Constraint violation",
        LDAP_TYPE_OR_VALUE_EXISTS => "Type or value exists",
        LDAP_INVALID_SYNTAX => "Invalid syntax",
        LDAP_NO_SUCH_OBJECT => "No such object",
        LDAP_ALIAS_PROBLEM => "Alias problem",
        LDAP_INVALID_DN_SYNTAX => "Invalid DN syntax",
        LDAP_IS_LEAF => "Entry is a leaf",
        LDAP_ALIAS_DEREF_PROBLEM => "Alias dereferencing problem",
        LDAP_X_PROXY_AUTHZ_FAILURE => "Proxy Authorization Failure",
        LDAP_INAPPROPRIATE_AUTH => "Inappropriate authentication",
        LDAP_INVALID_CREDENTIALS => "Invalid credentials",
        LDAP_INSUFFICIENT_ACCESS => "Insufficient access",
        LDAP_BUSY => "Server is busy",
        LDAP_UNAVAILABLE => "Server is unavailable",
        LDAP_UNWILLING_TO_PERFORM => "Server is unwilling to perform",
        LDAP_LOOP_DETECT => "Loop detected",
        LDAP_NAMING_VIOLATION => "Naming violation",
        LDAP_OBJECT_CLASS_VIOLATION => "Object class violation",
        LDAP_NOT_ALLOWED_ON_NONLEAF => "Operation not allowed on non-leaf",
        LDAP_NOT_ALLOWED_ON_RDN => "Operation not allowed on RDN",
        LDAP_ALREADY_EXISTS => "Already exists",
        LDAP_NO_OBJECT_CLASS_MODS => "Cannot modify object class",
        LDAP_RESULTS_TOO_LARGE => "Results too large",
        LDAP_AFFECTS_MULTIPLE_DSAS => "Operation affects multiple DSAs",
        LDAP_VLV_ERROR => "Virtual List View error",
        LDAP_OTHER => "Other (e.g., implementation specific) error",
        LDAP_CANCELLED => "Cancelled",
        LDAP_NO_SUCH_OPERATION => "No Operation to Cancel",
        LDAP_TOO_LATE => "Too Late to Cancel",
        LDAP_CANNOT_CANCEL => "Cannot Cancel",
        LDAP_ASSERTION_FAILED => "Assertion Failed",
        LDAP_PROXIED_AUTHORIZATION_DENIED => "Proxied Authorization Denied",
        LDAP_SYNC_REFRESH_REQUIRED => "Content Sync Refresh Required",
        LDAP_SERVER_DOWN => "Can't contact LDAP server",
        LDAP_LOCAL_ERROR => "Local error",
        LDAP_ENCODING_ERROR => "Encoding error",
        LDAP_DECODING_ERROR => "Decoding error",
        LDAP_TIMEOUT => "Timed out",
        LDAP_AUTH_UNKNOWN => "Unknown authentication method",
        LDAP_FILTER_ERROR => "Bad search filter",
        LDAP_USER_CANCELLED => "User cancelled operation",
        LDAP_PARAM_ERROR => "Bad parameter to an ldap routine",
        LDAP_NO_MEMORY => "Out of memory",
        LDAP_CONNECT_ERROR => "Connect error",
        LDAP_NOT_SUPPORTED => "Not Supported",
        LDAP_CONTROL_NOT_FOUND => "Control not found",
        LDAP_NO_RESULTS_RETURNED => "No results returned",
        LDAP_MORE_RESULTS_TO_RETURN => "More results to return",
        LDAP_CLIENT_LOOP => "Client Loop",
        LDAP_REFERRAL_LIMIT_EXCEEDED => "Referral Limit Exceeded",
        LDAP_X_CONNECTING => "Connecting (X)",
        _ => return format!("unknown error {}", code),
    };
    text.to_string()
}

/// Description for `code`, followed by `detail` (server diagnostic or local context) when non-empty.
fn message(code: i32, detail: &str) -> String {
    let text = describe(code);
    if detail.is_empty() {
        text
    } else {
        format!("{}: {}", text, detail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LdapError {
    #[error("LDAP connection error ({code}) : {message}")]
    Connection { code: i32, message: String },

    #[error("LDAP option error ({code}) : {message}")]
    Option { code: i32, message: String },

    #[error("LDAP StartTLS error ({code}) : {message}")]
    Tls { code: i32, message: String },

    #[error("LDAP bind error ({code}) : {message}")]
    Auth { code: i32, message: String },

    #[error("LDAP control error : invalid OID {oid:?} ({reason})")]
    Control { oid: String, reason: String },

    #[error("LDAP search error ({code}) : {message}")]
    Search { code: i32, message: String },

    #[error("LDAP decode error ({code}) : {message}")]
    Decode { code: i32, message: String },

    #[error("LDAP lookup error : attribute {attribute} not found")]
    Lookup { attribute: String },
}

impl LdapError {
    pub fn connection(code: i32, detail: impl AsRef<str>) -> Self {
        debug_assert_ne!(code, LDAP_SUCCESS);
        Self::Connection { code, message: message(code, detail.as_ref()) }
    }

    pub fn option(code: i32, detail: impl AsRef<str>) -> Self {
        debug_assert_ne!(code, LDAP_SUCCESS);
        Self::Option { code, message: message(code, detail.as_ref()) }
    }

    pub fn tls(code: i32, detail: impl AsRef<str>) -> Self {
        debug_assert_ne!(code, LDAP_SUCCESS);
        Self::Tls { code, message: message(code, detail.as_ref()) }
    }

    pub fn auth(code: i32, detail: impl AsRef<str>) -> Self {
        debug_assert_ne!(code, LDAP_SUCCESS);
        Self::Auth { code, message: message(code, detail.as_ref()) }
    }

    pub fn search(code: i32, detail: impl AsRef<str>) -> Self {
        debug_assert_ne!(code, LDAP_SUCCESS);
        Self::Search { code, message: message(code, detail.as_ref()) }
    }

    pub fn decode(detail: impl AsRef<str>) -> Self {
        Self::Decode {
            code: LDAP_DECODING_ERROR,
            message: message(LDAP_DECODING_ERROR, detail.as_ref()),
        }
    }

    pub fn control(oid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Control { oid: oid.into(), reason: reason.into() }
    }

    pub fn lookup(attribute: impl Into<String>) -> Self {
        Self::Lookup { attribute: attribute.into() }
    }

    /// Numeric result code carried by the error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Connection { code, .. }
            | Self::Option { code, .. }
            | Self::Tls { code, .. }
            | Self::Auth { code, .. }
            | Self::Search { code, .. }
            | Self::Decode { code, .. } => Some(*code),
            Self::Control { .. } | Self::Lookup { .. } => None,
        }
    }

    /// Transport failures raised by the session layer surface as search errors during a search.
    pub(crate) fn into_search(self) -> Self {
        match self {
            Self::Connection { code, message } => Self::Search { code, message },
            other => other,
        }
    }

    /// Same as `into_search`, for the StartTLS exchange.
    pub(crate) fn into_tls(self) -> Self {
        match self {
            Self::Connection { code, message } => Self::Tls { code, message },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, LdapError>;
