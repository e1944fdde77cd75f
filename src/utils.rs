use nom::{
    bytes::complete::take,
    combinator::map,
    number::complete::{be_u16, be_u32},
    IResult,
};

pub struct Utils;

impl Utils {
    pub fn round(x: f64, decimals: u32) -> f64 {
        let y = 10i32.pow(decimals) as f64;
        (x * y).round() / y
    }

    // wrapping 8-bit sum, as used by the datalogger trailer
    pub fn sum8(data: &[u8]) -> u8 {
        data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
    }

    pub fn be_u16_f64(input: &[u8]) -> IResult<&[u8], f64> {
        map(be_u16, f64::from)(input)
    }

    pub fn be_u16_div10(input: &[u8]) -> IResult<&[u8], f64> {
        map(be_u16, |i| Self::round(f64::from(i) / 10.0, 1))(input)
    }

    pub fn be_u16_div100(input: &[u8]) -> IResult<&[u8], f64> {
        map(be_u16, |i| Self::round(f64::from(i) / 100.0, 2))(input)
    }

    pub fn be_u32_f64(input: &[u8]) -> IResult<&[u8], f64> {
        map(be_u32, f64::from)(input)
    }

    pub fn be_u32_div10(input: &[u8]) -> IResult<&[u8], f64> {
        map(be_u32, |i| Self::round(f64::from(i) / 10.0, 1))(input)
    }

    /// 16 byte ASCII serial, NUL padded.
    pub fn serial16(input: &[u8]) -> IResult<&[u8], String> {
        map(take(16usize), Self::ascii_trimmed)(input)
    }

    pub fn ascii_trimmed(raw: &[u8]) -> String {
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).trim().to_string()
    }
}
