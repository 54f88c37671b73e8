//! Output-script parser for name-registration payloads.
//!
//! A registration output looks like:
//!
//! ```text
//! 6a             OP_RETURN
//! 04 01010101    push of the 4-byte protocol id
//! <len>          name length (0x00..=0x63), a plain length byte
//! <name>         `len` bytes of [0-9A-Za-z_]
//! <payment...>   one or more payment data pushes (not interpreted here)
//! ```

/// OP_RETURN followed by the protocol identifier push.
pub const PROTOCOL_PREFIX: [u8; 6] = [0x6a, 0x04, 0x01, 0x01, 0x01, 0x01];

/// Smallest script that can hold a registration:
/// prefix (6) + length (1) + name (1) + payment push (1) + payment data (2).
pub const MIN_SCRIPT_LEN: usize = 11;

/// Longest name a registration may carry.
pub const MAX_NAME_LEN: u8 = 0x63;

/// Extract the registered name from an output script.
///
/// Returns `None` for every script that is not a well-formed registration;
/// rejection is the normal case and never an error.
///
/// A declared length of zero yields `Some(&[])`. This mirrors what deployed
/// indexers accept and is kept deliberately.
pub fn parse_name(script: &[u8]) -> Option<&[u8]> {
    if script.len() < MIN_SCRIPT_LEN {
        return None;
    }
    if script[..PROTOCOL_PREFIX.len()] != PROTOCOL_PREFIX {
        return None;
    }

    let declared = script[6];
    if declared > MAX_NAME_LEN {
        return None;
    }

    let end = 7 + declared as usize;
    let name = script.get(7..end)?;
    if !name.iter().copied().all(is_name_byte) {
        return None;
    }
    Some(name)
}

/// `true` for bytes in `[0-9A-Za-z_]`.
pub fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Build a registration script carrying `name` followed by one payment push.
///
/// `payment` is pushed with a direct push opcode and must be at most 75 bytes.
/// The result is accepted by [`parse_name`] whenever `name` is valid and at
/// least one payment byte is given.
pub fn registration_script(name: &[u8], payment: &[u8]) -> Vec<u8> {
    debug_assert!(payment.len() <= 75);
    let mut script = Vec::with_capacity(PROTOCOL_PREFIX.len() + 2 + name.len() + payment.len());
    script.extend_from_slice(&PROTOCOL_PREFIX);
    script.push(name.len() as u8);
    script.extend_from_slice(name);
    script.push(payment.len() as u8);
    script.extend_from_slice(payment);
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_prefix(rest: &[u8]) -> Vec<u8> {
        let mut s = PROTOCOL_PREFIX.to_vec();
        s.extend_from_slice(rest);
        s
    }

    #[test]
    fn short_scripts_rejected() {
        for len in 0..MIN_SCRIPT_LEN {
            let script = with_prefix(&[0x01, b'a', 0x01, 0x01, 0x01])[..len].to_vec();
            assert_eq!(parse_name(&script), None, "len {len}");
        }
    }

    #[test]
    fn minimal_eleven_byte_script_accepted() {
        let script = with_prefix(&[0x01, b'x', 0x02, 0x01, 0xaa]);
        assert_eq!(script.len(), 11);
        assert_eq!(parse_name(&script), Some(&b"x"[..]));
    }

    #[test]
    fn wrong_prefix_rejected() {
        let good = registration_script(b"alice", &[0x01, 0x02]);
        for i in 0..PROTOCOL_PREFIX.len() {
            let mut bad = good.clone();
            bad[i] ^= 0xff;
            assert_eq!(parse_name(&bad), None, "byte {i}");
        }
    }

    #[test]
    fn declared_length_above_limit_rejected() {
        let name = vec![b'a'; 0x64];
        let mut script = with_prefix(&[0x64]);
        script.extend_from_slice(&name);
        script.extend_from_slice(&[0x01, 0x01]);
        assert_eq!(parse_name(&script), None);

        let script = with_prefix(&[0xff, b'a', b'b', b'c', b'd']);
        assert_eq!(parse_name(&script), None);
    }

    #[test]
    fn declared_length_at_limit_accepted() {
        let name = vec![b'Z'; 0x63];
        let script = registration_script(&name, &[0x01, 0x02]);
        assert_eq!(parse_name(&script), Some(name.as_slice()));
    }

    #[test]
    fn zero_length_name_accepted() {
        let script = with_prefix(&[0x00, 0x01, 0x01, 0x01, 0x01]);
        assert_eq!(parse_name(&script), Some(&b""[..]));
    }

    #[test]
    fn length_exceeding_data_rejected() {
        let script = with_prefix(&[0x08, b'a', b'b', b'c', b'd']);
        assert_eq!(parse_name(&script), None);
    }

    #[test]
    fn name_consuming_whole_tail_accepted() {
        let script = with_prefix(&[0x04, b'a', b'b', b'c', b'd']);
        assert_eq!(parse_name(&script), Some(&b"abcd"[..]));
    }

    #[test]
    fn invalid_charset_rejected() {
        for bad in [b'-', b' ', b'.', b'@', 0x00, 0x7f, 0xc3, b'[', b'`', b'{', b'/', b':'] {
            let name = [b'o', b'k', bad, b'x'];
            let script = registration_script(&name, &[0x01, 0x02]);
            assert_eq!(parse_name(&script), None, "byte {bad:#04x}");
        }
    }

    #[test]
    fn full_charset_accepted() {
        let name = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_";
        let script = registration_script(name, &[0x01, 0x02]);
        assert_eq!(parse_name(&script), Some(&name[..]));
    }

    #[test]
    fn payment_bytes_not_inspected() {
        let script = registration_script(b"bob", &[0xff, 0x00, 0x80]);
        assert_eq!(parse_name(&script), Some(&b"bob"[..]));
    }
}
