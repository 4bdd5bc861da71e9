//! XRP classic address validation

use super::sanitize::mask_address;
use super::SecurityError;

pub const XRP_ADDRESS_MIN_LENGTH: usize = 25;
pub const XRP_ADDRESS_MAX_LENGTH: usize = 35;

/// Version byte of an XRPL account id (encodes to the leading `r`)
const ACCOUNT_ID_VERSION: u8 = 0x00;

/// Validate a classic address: `r` prefix, 25-35 characters, Ripple base58 with a
/// valid checksum
pub fn validate_xrp_address(address: &str) -> Result<(), SecurityError> {
    let invalid = |reason: &'static str| SecurityError::InvalidAddress {
        address: mask_address(address),
        reason,
    };

    if !(XRP_ADDRESS_MIN_LENGTH..=XRP_ADDRESS_MAX_LENGTH).contains(&address.len()) {
        return Err(invalid("must be 25-35 characters"));
    }

    if !address.starts_with('r') {
        return Err(invalid("must start with 'r'"));
    }

    bs58::decode(address)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .with_check(Some(ACCOUNT_ID_VERSION))
        .into_vec()
        .map_err(|_| invalid("bad characters or checksum"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENESIS: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";
    const ACCOUNT_ZERO: &str = "rrrrrrrrrrrrrrrrrrrrrhoLvTp";

    #[test]
    fn test_valid_addresses() {
        assert!(validate_xrp_address(GENESIS).is_ok());
        assert!(validate_xrp_address(ACCOUNT_ZERO).is_ok());
    }

    #[test]
    fn test_empty_address() {
        assert!(validate_xrp_address("").is_err());
    }

    #[test]
    fn test_too_short_and_too_long() {
        assert!(validate_xrp_address("rHb9CJAWyB4rj91").is_err());
        let long = format!("{}{}", GENESIS, "rrrrrr");
        assert!(validate_xrp_address(&long).is_err());
    }

    #[test]
    fn test_wrong_prefix() {
        let swapped = GENESIS.replacen('r', "x", 1);
        assert!(validate_xrp_address(&swapped).is_err());
    }

    #[test]
    fn test_invalid_alphabet() {
        // '0', 'O', 'I' and 'l' are not in the Ripple alphabet
        let bad = "rHb9CJAWyB4rj91VRWn96DkukG4bwdty0l";
        assert!(validate_xrp_address(bad).is_err());
    }

    #[test]
    fn test_bad_checksum() {
        let tampered = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTi";
        assert!(validate_xrp_address(tampered).is_err());
    }

    #[test]
    fn test_error_masks_address() {
        let err = validate_xrp_address("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTi").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("rHb9...tyTi"));
        assert!(!text.contains("CJAWyB4rj91"));
    }
}
