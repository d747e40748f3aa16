//! Stream filters.
//!
//! Decoding runs the `/Filter` chain in order, applying each filter's `/DecodeParms`.

use crate::error::DecompressError;
use crate::object::{Dictionary, Stream};
use crate::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use log::{debug, warn};
use std::io::Read;

pub mod png;
pub mod tiff;

/// Decodes all filters of `stream`.
pub fn decode_stream(stream: &Stream) -> Result<Vec<u8>> {
    if stream.dict.has_type(b"XObject") && stream.dict.get(b"Subtype").and_then(|s| s.as_name()).ok() == Some(&b"Image"[..])
    {
        return Err(Error::Unimplemented("image streams"));
    }

    let filters = stream.filters()?;
    let params = stream.decode_parms();
    let mut data = stream.content.to_vec();
    for (filter, params) in filters.into_iter().zip(params) {
        data = decode(&data, filter, params)?;
    }
    Ok(data)
}

/// Decodes `input` with a single filter.
pub fn decode(input: &[u8], filter: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    debug!("decoding {} bytes with /{}", input.len(), String::from_utf8_lossy(filter));
    match filter {
        b"FlateDecode" | b"Fl" => predict(inflate(input)?, params),
        b"LZWDecode" | b"LZW" => predict(decode_lzw(input, params)?, params),
        b"ASCIIHexDecode" | b"AHx" => Ok(decode_ascii_hex(input)?),
        b"ASCII85Decode" | b"A85" => Ok(decode_ascii85(input)?),
        // Decryption happens before filters run.
        b"Crypt" => Ok(input.to_vec()),
        b"DCTDecode" | b"DCT" | b"JPXDecode" | b"JBIG2Decode" | b"CCITTFaxDecode" | b"CCF" => {
            Err(Error::Unimplemented("image filters"))
        }
        other => {
            warn!("unsupported filter /{}", String::from_utf8_lossy(other));
            Err(Error::Unimplemented("stream filter"))
        }
    }
}

/// True when the first two bytes form a valid zlib header for deflate.
pub fn has_zlib_header(input: &[u8]) -> bool {
    match input {
        [cmf, flg, ..] => (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0 && cmf & 0x0F == 8,
        _ => false,
    }
}

/// Inflates zlib-wrapped or raw deflate data.
pub fn inflate(input: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(input.len() * 2);
    if input.is_empty() {
        return Ok(output);
    }
    let result = if has_zlib_header(input) {
        ZlibDecoder::new(input).read_to_end(&mut output)
    } else {
        DeflateDecoder::new(input).read_to_end(&mut output)
    };
    result.map_err(DecompressError::Flate)?;
    Ok(output)
}

fn decode_lzw(input: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    use weezl::{BitOrder, decode::Decoder};

    let early_change = params
        .and_then(|p| p.get(b"EarlyChange").ok())
        .and_then(|p| p.as_i64().ok())
        .is_none_or(|v| v != 0);

    let mut decoder = if early_change {
        Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
    } else {
        Decoder::new(BitOrder::Msb, 8)
    };
    decoder
        .decode(input)
        .map_err(|err| DecompressError::Lzw(err.to_string()).into())
}

fn decode_ascii_hex(input: &[u8]) -> std::result::Result<Vec<u8>, DecompressError> {
    let mut output = Vec::with_capacity(input.len() / 2);
    let mut pending: Option<u8> = None;
    for &byte in input {
        let digit = match byte {
            b'>' => break,
            _ if crate::cursor::is_whitespace(byte) => continue,
            _ => (byte as char).to_digit(16).ok_or(DecompressError::AsciiHex(byte))? as u8,
        };
        pending = match pending {
            Some(high) => {
                output.push(high << 4 | digit);
                None
            }
            None => Some(digit),
        };
    }
    if let Some(high) = pending {
        output.push(high << 4);
    }
    Ok(output)
}

fn decode_ascii85(input: &[u8]) -> std::result::Result<Vec<u8>, DecompressError> {
    let mut output = Vec::with_capacity(input.len() * 4 / 5);
    let mut group: u32 = 0;
    let mut count = 0;

    for &byte in input {
        match byte {
            b'~' => break,
            b'z' if count == 0 => output.extend_from_slice(&[0; 4]),
            b'z' => return Err(DecompressError::Ascii85("'z' inside a group")),
            b'!'..=b'u' => {
                group = group
                    .checked_mul(85)
                    .and_then(|v| v.checked_add(u32::from(byte - b'!')))
                    .ok_or(DecompressError::Ascii85("group overflow"))?;
                count += 1;
                if count == 5 {
                    output.extend_from_slice(&group.to_be_bytes());
                    group = 0;
                    count = 0;
                }
            }
            _ if crate::cursor::is_whitespace(byte) => {}
            _ => return Err(DecompressError::Ascii85("invalid character")),
        }
    }

    match count {
        0 => {}
        1 => return Err(DecompressError::Ascii85("single trailing character")),
        _ => {
            for _ in count..5 {
                group = group
                    .checked_mul(85)
                    .and_then(|v| v.checked_add(84))
                    .ok_or(DecompressError::Ascii85("group overflow"))?;
            }
            output.extend_from_slice(&group.to_be_bytes()[..count - 1]);
        }
    }
    Ok(output)
}

fn param(params: &Dictionary, key: &[u8], default: i64) -> Result<usize> {
    let value = params.try_get_as::<i64>(key)?.unwrap_or(default);
    usize::try_from(value).map_err(|_| Error::Unimplemented("negative predictor parameter"))
}

/// Bytes per pixel and per row of predicted data. A row larger than the data is rejected before
/// any buffer is allocated.
pub(crate) fn row_layout(
    colors: usize, bits: usize, columns: usize, available: usize,
) -> std::result::Result<(usize, usize), DecompressError> {
    let too_large = DecompressError::RowSize {
        colors,
        bits,
        columns,
        available,
    };
    let Some(bits_per_pixel) = colors.checked_mul(bits) else {
        return Err(too_large);
    };
    let Some(bits_per_row) = bits_per_pixel.checked_mul(columns) else {
        return Err(too_large);
    };
    let bytes_per_row = bits_per_row.div_ceil(8);
    if bytes_per_row > available {
        return Err(too_large);
    }
    Ok((bits_per_pixel.div_ceil(8).max(1), bytes_per_row))
}

/// Undoes the predictor named in `params`, if any.
pub fn predict(data: Vec<u8>, params: Option<&Dictionary>) -> Result<Vec<u8>> {
    let Some(params) = params else {
        return Ok(data);
    };
    let predictor = params.try_get_as::<i64>(b"Predictor")?.unwrap_or(1);
    let colors = param(params, b"Colors", 1)?;
    let bits = param(params, b"BitsPerComponent", 8)?;
    let columns = param(params, b"Columns", 1)?;

    match predictor {
        1 => Ok(data),
        2 | 10..=15 if data.is_empty() => Ok(data),
        2 => Ok(tiff::decode_frame(&data, colors, bits, columns)?),
        10..=15 => {
            let (bytes_per_pixel, bytes_per_row) = row_layout(colors, bits, columns, data.len())?;
            Ok(png::decode_frame(&data, bytes_per_pixel, bytes_per_row)?)
        }
        _ => Err(Error::Unimplemented("predictor")),
    }
}
