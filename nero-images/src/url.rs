const STORAGE_HOST: &str = "https://firebasestorage.googleapis.com/v0/b";

/// Percent-encode everything but `A-Z a-z 0-9 - _ . ! ~ * ' ( )`, so `/` becomes `%2F`
pub fn encode_uri_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Download URL for the object at `path` in `bucket`
pub fn storage_url(bucket: &str, path: &str) -> String {
    format!(
        "{STORAGE_HOST}/{bucket}/o/{}?alt=media",
        encode_uri_component(path)
    )
}
