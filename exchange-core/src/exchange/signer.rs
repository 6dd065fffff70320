//! Request signing for authenticated REST endpoints.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use exchange_common::ExchangeError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac(key: &[u8], message: &str) -> Result<Vec<u8>, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ExchangeError::Configuration(format!("Failed to create HMAC: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Binance: hex HMAC-SHA256 of the full query string, keyed by the raw secret.
pub fn sign_binance(secret: &str, query: &str) -> Result<String, ExchangeError> {
    Ok(hex::encode(mac(secret.as_bytes(), query)?))
}

/// Coinbase: base64 HMAC-SHA256 of `timestamp + method + path + body`, keyed
/// by the base64-decoded secret.
pub fn sign_coinbase(
    secret: &str,
    timestamp: &str,
    method: &str,
    request_path: &str,
    body: &str,
) -> Result<String, ExchangeError> {
    let key = STANDARD.decode(secret).map_err(|e| {
        ExchangeError::Configuration(format!("coinbase api_secret is not valid base64: {}", e))
    })?;
    let message = format!("{}{}{}{}", timestamp, method, request_path, body);
    Ok(STANDARD.encode(mac(&key, &message)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binance_signature() {
        // Example from the Binance "SIGNED endpoint" documentation
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_binance(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_coinbase_signature_is_base64() {
        let secret = STANDARD.encode(b"super-secret");
        let sig = sign_coinbase(&secret, "1700000000", "GET", "/accounts", "").unwrap();
        assert_eq!(STANDARD.decode(&sig).unwrap().len(), 32);

        // same input, same signature
        let again = sign_coinbase(&secret, "1700000000", "GET", "/accounts", "").unwrap();
        assert_eq!(sig, again);
    }

    #[test]
    fn test_coinbase_rejects_non_base64_secret() {
        let result = sign_coinbase("not base64!!", "1", "GET", "/", "");
        assert!(matches!(result, Err(ExchangeError::Configuration(_))));
    }
}
