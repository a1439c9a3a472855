//! On-disk program image: signature, format version, postcard payload.

use crate::bytecode::Program;

pub const SIGNATURE: &[u8; 8] = b"CINDERIM";
pub const FORMAT_VERSION: u8 = 1;

#[derive(Debug)]
pub enum ImageError {
    BadSignature,
    UnsupportedVersion(u8),
    Truncated,
    Encode(postcard::Error),
    Decode(postcard::Error),
}

impl std::fmt::Display for ImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageError::BadSignature => write!(f, "not a program image (bad signature)"),
            ImageError::UnsupportedVersion(v) => write!(
                f,
                "unsupported image version {} (expected {})",
                v, FORMAT_VERSION
            ),
            ImageError::Truncated => write!(f, "program image is truncated"),
            ImageError::Encode(e) => write!(f, "failed to encode program image: {}", e),
            ImageError::Decode(e) => write!(f, "failed to decode program image: {}", e),
        }
    }
}

impl std::error::Error for ImageError {}

pub fn encode(program: &Program) -> Result<Vec<u8>, ImageError> {
    let payload = postcard::to_allocvec(program).map_err(ImageError::Encode)?;

    let mut bytes = Vec::with_capacity(SIGNATURE.len() + 1 + payload.len());
    bytes.extend_from_slice(SIGNATURE);
    bytes.push(FORMAT_VERSION);
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<Program, ImageError> {
    if bytes.len() <= SIGNATURE.len() {
        return Err(if bytes.starts_with(SIGNATURE) || SIGNATURE.starts_with(bytes) {
            ImageError::Truncated
        } else {
            ImageError::BadSignature
        });
    }

    let (signature, rest) = bytes.split_at(SIGNATURE.len());
    if signature != SIGNATURE {
        return Err(ImageError::BadSignature);
    }

    let (version, payload) = (rest[0], &rest[1..]);
    if version != FORMAT_VERSION {
        return Err(ImageError::UnsupportedVersion(version));
    }

    postcard::from_bytes(payload).map_err(ImageError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::Compiler;
    use crate::frontend::SourceFile;

    fn sample() -> Program {
        Compiler::new()
            .compile(&[SourceFile::new(
                "main.s",
                "function main:\nldstr R0, \"hi\"\nmov R1, -2.5\ncall main\n",
            )])
            .unwrap()
    }

    #[test]
    fn test_image_preserves_program() {
        let program = sample();
        let bytes = encode(&program).unwrap();

        assert!(bytes.starts_with(SIGNATURE));
        assert_eq!(bytes[SIGNATURE.len()], FORMAT_VERSION);
        assert_eq!(decode(&bytes).unwrap(), program);
    }

    #[test]
    fn test_rejects_foreign_bytes() {
        assert!(matches!(decode(b"#!/bin/sh\necho"), Err(ImageError::BadSignature)));
        assert!(matches!(decode(b"CINDER"), Err(ImageError::Truncated)));
    }

    #[test]
    fn test_rejects_other_version() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[SIGNATURE.len()] = 9;
        assert!(matches!(decode(&bytes), Err(ImageError::UnsupportedVersion(9))));
    }

    #[test]
    fn test_rejects_corrupt_payload() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.truncate(SIGNATURE.len() + 3);
        assert!(matches!(decode(&bytes), Err(ImageError::Decode(_))));
    }
}
