//! Shared plumbing for the channel harnesses: logging setup and the
//! conversions from loosely-typed command-line fields into the library's
//! types.

use anyhow::{bail, Context};
use lcshm::{AmfVersion, Envelope, Flags, Sandbox, Version};
use tracing_subscriber::EnvFilter;

/// Install the stderr logging subscriber.
///
/// Filtering follows `RUST_LOG` (default `info`). Logs go to stderr so
/// stdout carries nothing but each harness's result lines.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Decode the hexadecimal payload argument.
///
/// An odd trailing nibble is dropped rather than rejected, matching the
/// historical harness behavior; invalid digits are an error.
pub fn parse_hex_payload(hex_str: &str) -> anyhow::Result<Vec<u8>> {
    let even = &hex_str[..hex_str.len() - hex_str.len() % 2];
    hex::decode(even).context("payload is not valid hexadecimal")
}

/// Historical flag convention: anything not starting with `'0'` is set.
pub fn parse_flag(field: &str) -> bool {
    !field.starts_with('0')
}

/// Assemble the version-gated envelope from raw field values, rejecting
/// out-of-set values at the boundary.
///
/// Fields beyond what `version` carries are ignored, as the wire format
/// ignores them; the filepath is attached whenever the version can carry
/// one and is dropped by the codec unless the sandbox calls for it.
pub fn build_envelope(
    version: u32,
    sandboxed: bool,
    https: bool,
    sandbox: i32,
    swfv: u32,
    filepath: &str,
    amfv: u32,
) -> anyhow::Result<Envelope> {
    let version = Version::try_from(version).context("version")?;
    let flags = Flags { sandboxed, https };

    let envelope = match version {
        Version::V1 => Envelope::V1,
        Version::V2 => Envelope::V2(flags),
        Version::V3 => Envelope::V3 {
            flags,
            sandbox: Sandbox::try_from(sandbox).context("sandbox")?,
            swfv,
            filepath: Some(filepath.to_owned()),
        },
        Version::V4 => Envelope::V4 {
            flags,
            sandbox: Sandbox::try_from(sandbox).context("sandbox")?,
            swfv,
            filepath: Some(filepath.to_owned()),
            amfv: AmfVersion::try_from(amfv).context("amfv")?,
        },
    };

    if let Some(Sandbox::LocalWithFile) = envelope.sandbox() {
        if filepath.is_empty() {
            bail!("filepath: required for the local-with-file sandbox");
        }
    }

    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_payload() {
        assert_eq!(parse_hex_payload("0a0b").unwrap(), vec![0x0A, 0x0B]);
        assert_eq!(parse_hex_payload("").unwrap(), Vec::<u8>::new());
        // Odd trailing nibble is dropped.
        assert_eq!(parse_hex_payload("abc").unwrap(), vec![0xAB]);
        assert!(parse_hex_payload("zz").is_err());
    }

    #[test]
    fn test_parse_flag_convention() {
        assert!(!parse_flag("0"));
        assert!(!parse_flag("000"));
        assert!(parse_flag("1"));
        assert!(parse_flag("true"));
    }

    #[test]
    fn test_envelope_version_gating() {
        // Version 1 ignores every gated field.
        let envelope = build_envelope(1, true, true, 3, 9, "/tmp/x.swf", 3).unwrap();
        assert_eq!(envelope, Envelope::V1);

        let envelope = build_envelope(2, true, false, 0, 0, "", 0).unwrap();
        assert_eq!(
            envelope,
            Envelope::V2(Flags {
                sandboxed: true,
                https: false
            })
        );

        let envelope = build_envelope(4, false, false, 5, 32, "", 3).unwrap();
        assert_eq!(envelope.sandbox(), Some(Sandbox::Application));
        assert_eq!(envelope.amfv(), Some(AmfVersion::Amf3));
    }

    #[test]
    fn test_boundary_rejections() {
        assert!(build_envelope(0, false, false, 0, 0, "", 0).is_err());
        assert!(build_envelope(5, false, false, 0, 0, "", 0).is_err());
        // Sandbox gap value and unknown AMF versions are rejected.
        assert!(build_envelope(3, false, false, 4, 0, "", 0).is_err());
        assert!(build_envelope(4, false, false, 0, 0, "", 1).is_err());
        // local-with-file requires a filepath.
        assert!(build_envelope(3, false, false, 1, 0, "", 0).is_err());
    }
}
