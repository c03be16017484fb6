use super::{Field, FormData};
use url::form_urlencoded;

/// Decode `k1=v1&k2=v2` pairs into `form`.
///
/// Splits on `&`, then on the first `=`; both sides are percent-decoded with
/// `+` read as a space. A pair without `=` gets an empty value. Empty pairs
/// (`a=1&&b=2`) are skipped. Invalid UTF-8 after decoding is replaced lossily.
pub fn decode_into(input: &[u8], form: &mut FormData) {
    for (name, value) in form_urlencoded::parse(input) {
        form.insert(Field::text(name, value));
    }
}

pub fn decode(input: &[u8]) -> FormData {
    let mut form = FormData::new();
    decode_into(input, &mut form);
    form
}
