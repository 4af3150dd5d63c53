//! Message body charsets.
//!
//! `US-ASCII`, `ISO-8859-1` and the BOM-writing `UTF-16` are handled here,
//! every other label goes through `encoding_rs`. Characters a charset cannot
//! represent are written as `?`.

use bytes::Bytes;
use encoding_rs::{Encoding, EncoderResult, UTF_16BE, UTF_16LE};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported encoding: {0}")]
    Unsupported(String),
}

const REPLACEMENT: u8 = b'?';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Charset {
    Ascii,
    Latin1,
    /// big-endian with a leading byte order mark
    Utf16,
    Utf16Be,
    Utf16Le,
    Other(&'static Encoding),
}

fn charset(label: &str) -> Result<Charset> {
    let label = label.trim();
    let charset = match label.to_ascii_uppercase().as_str() {
        "US-ASCII" | "ASCII" | "ISO646-US" | "ANSI_X3.4-1968" => Charset::Ascii,
        "ISO-8859-1" | "ISO8859-1" | "ISO8859_1" | "ISO_8859_1" | "8859_1" | "LATIN1" => {
            Charset::Latin1
        }
        "UTF-16" | "UTF16" | "UTF_16" => Charset::Utf16,
        _ => match Encoding::for_label(label.as_bytes()) {
            Some(encoding) if encoding == UTF_16BE => Charset::Utf16Be,
            Some(encoding) if encoding == UTF_16LE => Charset::Utf16Le,
            Some(encoding) => Charset::Other(encoding),
            None => return Err(Error::Unsupported(label.to_string())),
        },
    };
    Ok(charset)
}

/// encode the message body
pub fn encode(text: &str, label: &str) -> Result<Bytes> {
    let bytes: Vec<u8> = match charset(label)? {
        Charset::Ascii => text.chars().map(|c| narrow(c, 0x7f)).collect(),
        Charset::Latin1 => text.chars().map(|c| narrow(c, 0xff)).collect(),
        Charset::Utf16 if text.is_empty() => Vec::new(),
        Charset::Utf16 => [0xfe_u8, 0xff]
            .into_iter()
            .chain(text.encode_utf16().flat_map(u16::to_be_bytes))
            .collect(),
        Charset::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
        Charset::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        Charset::Other(encoding) => encode_replacing(text, encoding),
    };
    Ok(Bytes::from(bytes))
}

fn narrow(c: char, max: u32) -> u8 {
    match u32::from(c) {
        code if code <= max => code as u8,
        _ => REPLACEMENT,
    }
}

fn encode_replacing(text: &str, encoding: &'static Encoding) -> Vec<u8> {
    let mut encoder = encoding.new_encoder();
    let mut out = Vec::with_capacity(text.len());
    let mut rest = text;
    loop {
        let (result, read) = encoder.encode_from_utf8_to_vec_without_replacement(rest, &mut out, true);
        rest = &rest[read..];
        match result {
            EncoderResult::InputEmpty => return out,
            EncoderResult::OutputFull => {
                let needed = encoder
                    .max_buffer_length_from_utf8_without_replacement(rest.len())
                    .unwrap_or(rest.len() * 4);
                out.reserve(needed.max(16));
            }
            EncoderResult::Unmappable(_) => out.push(REPLACEMENT),
        }
    }
}

/// decode a reply, malformed sequences become U+FFFD
pub fn decode(bytes: &[u8], label: &str) -> Result<String> {
    let text = match charset(label)? {
        Charset::Ascii => bytes
            .iter()
            .map(|&b| if b.is_ascii() { char::from(b) } else { char::REPLACEMENT_CHARACTER })
            .collect(),
        Charset::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        Charset::Utf16 => match bytes {
            [0xfe, 0xff, rest @ ..] => decode_with(UTF_16BE, rest),
            [0xff, 0xfe, rest @ ..] => decode_with(UTF_16LE, rest),
            _ => decode_with(UTF_16BE, bytes),
        },
        Charset::Utf16Be => decode_with(UTF_16BE, bytes),
        Charset::Utf16Le => decode_with(UTF_16LE, bytes),
        Charset::Other(encoding) => decode_with(encoding, bytes),
    };
    Ok(text)
}

fn decode_with(encoding: &'static Encoding, bytes: &[u8]) -> String {
    let (text, _) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}
