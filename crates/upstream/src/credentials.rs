//! Credential header injection for RapidAPI-fronted providers

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Header carrying the subscriber key.
pub const API_KEY_HEADER: &str = "x-rapidapi-key";

/// Header naming the upstream service behind the RapidAPI gateway.
pub const API_HOST_HEADER: &str = "x-rapidapi-host";

/// A credential or host value that cannot be sent as an HTTP header.
#[derive(Debug, thiserror::Error)]
#[error("invalid value for header {header}")]
pub struct CredentialError {
    pub header: &'static str,
}

/// Insert the key and host headers, replacing any existing values.
///
/// The error never includes the rejected value, since it may be a key.
pub fn inject_credentials(
    headers: &mut HeaderMap,
    key: &str,
    host: &str,
) -> Result<(), CredentialError> {
    let mut key_value = HeaderValue::from_str(key).map_err(|_| CredentialError {
        header: API_KEY_HEADER,
    })?;
    key_value.set_sensitive(true);
    let host_value = HeaderValue::from_str(host).map_err(|_| CredentialError {
        header: API_HOST_HEADER,
    })?;

    headers.insert(HeaderName::from_static(API_KEY_HEADER), key_value);
    headers.insert(HeaderName::from_static(API_HOST_HEADER), host_value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_key_and_host() {
        let mut headers = HeaderMap::new();
        inject_credentials(&mut headers, "key-one", "yt-api.p.rapidapi.com").unwrap();

        assert_eq!(headers.get("X-RapidAPI-Key").unwrap(), "key-one");
        assert_eq!(
            headers.get("X-RapidAPI-Host").unwrap(),
            "yt-api.p.rapidapi.com"
        );
        assert!(headers.get(API_KEY_HEADER).unwrap().is_sensitive());
    }

    #[test]
    fn replaces_previous_key() {
        let mut headers = HeaderMap::new();
        inject_credentials(&mut headers, "key-one", "host").unwrap();
        inject_credentials(&mut headers, "key-two", "host").unwrap();

        assert_eq!(headers.get_all(API_KEY_HEADER).iter().count(), 1);
        assert_eq!(headers.get(API_KEY_HEADER).unwrap(), "key-two");
    }

    #[test]
    fn preserves_unrelated_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("application/json"));
        inject_credentials(&mut headers, "key-one", "host").unwrap();
        assert_eq!(headers.get("accept").unwrap(), "application/json");
    }

    #[test]
    fn rejects_key_with_newline_without_echoing_it() {
        let mut headers = HeaderMap::new();
        let err = inject_credentials(&mut headers, "secret\nvalue", "host").unwrap_err();
        assert_eq!(err.header, API_KEY_HEADER);
        assert!(!err.to_string().contains("secret"));
        assert!(headers.is_empty());
    }
}
