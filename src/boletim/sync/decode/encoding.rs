use encoding_rs::{UTF_8, UTF_16BE, UTF_16LE, WINDOWS_1252};

/// Character encodings tried, in order, when decoding an exported report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextEncoding {
    /// UTF-8, skipping a leading byte-order mark when present.
    Utf8Sig,
    Utf8,
    Latin1,
    Windows1252,
    Iso8859_1,
    /// DOS Latin-1 (code page 850).
    Cp850,
    /// UTF-16 with byte-order mark sniffing, little-endian when absent.
    Utf16,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    pub const CASCADE: [TextEncoding; 9] = [
        TextEncoding::Utf8Sig,
        TextEncoding::Utf8,
        TextEncoding::Latin1,
        TextEncoding::Windows1252,
        TextEncoding::Iso8859_1,
        TextEncoding::Cp850,
        TextEncoding::Utf16,
        TextEncoding::Utf16Le,
        TextEncoding::Utf16Be,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TextEncoding::Utf8Sig => "utf-8-sig",
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Latin1 => "latin-1",
            TextEncoding::Windows1252 => "cp1252",
            TextEncoding::Iso8859_1 => "iso-8859-1",
            TextEncoding::Cp850 => "cp850",
            TextEncoding::Utf16 => "utf-16",
            TextEncoding::Utf16Le => "utf-16le",
            TextEncoding::Utf16Be => "utf-16be",
        }
    }

    /// Decodes `bytes`, returning `None` when they are malformed for this
    /// encoding. Single-byte encodings never fail.
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8Sig => {
                let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
                strict(UTF_8, body)
            }
            TextEncoding::Utf8 => strict(UTF_8, bytes),
            TextEncoding::Latin1 | TextEncoding::Iso8859_1 => {
                Some(bytes.iter().map(|&byte| char::from(byte)).collect())
            }
            TextEncoding::Windows1252 => Some(
                WINDOWS_1252
                    .decode_without_bom_handling(bytes)
                    .0
                    .into_owned(),
            ),
            TextEncoding::Cp850 => Some(bytes.iter().map(|&byte| cp850_char(byte)).collect()),
            TextEncoding::Utf16 => {
                if let Some(body) = bytes.strip_prefix(b"\xFF\xFE") {
                    strict(UTF_16LE, body)
                } else if let Some(body) = bytes.strip_prefix(b"\xFE\xFF") {
                    strict(UTF_16BE, body)
                } else {
                    strict(UTF_16LE, bytes)
                }
            }
            TextEncoding::Utf16Le => strict(UTF_16LE, bytes),
            TextEncoding::Utf16Be => strict(UTF_16BE, bytes),
        }
    }
}

fn strict(encoding: &'static encoding_rs::Encoding, bytes: &[u8]) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
}

const CP850_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', //
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', 'ø', '£', 'Ø', '×', 'ƒ', //
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '®', '¬', '½', '¼', '¡', '«', '»', //
    '░', '▒', '▓', '│', '┤', 'Á', 'Â', 'À', '©', '╣', '║', '╗', '╝', '¢', '¥', '┐', //
    '└', '┴', '┬', '├', '─', '┼', 'ã', 'Ã', '╚', '╔', '╩', '╦', '╠', '═', '╬', '¤', //
    'ð', 'Ð', 'Ê', 'Ë', 'È', 'ı', 'Í', 'Î', 'Ï', '┘', '┌', '█', '▄', '¦', 'Ì', '▀', //
    'Ó', 'ß', 'Ô', 'Ò', 'õ', 'Õ', 'µ', 'þ', 'Þ', 'Ú', 'Û', 'Ù', 'ý', 'Ý', '¯', '´', //
    '\u{AD}', '±', '‗', '¾', '¶', '§', '÷', '¸', '°', '¨', '·', '¹', '³', '²', '■', '\u{A0}',
];

fn cp850_char(byte: u8) -> char {
    if byte < 0x80 {
        char::from(byte)
    } else {
        CP850_HIGH[usize::from(byte - 0x80)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_sig_skips_marker() {
        let text = TextEncoding::Utf8Sig
            .decode(b"\xEF\xBB\xBFnome;valor")
            .expect("valid UTF-8");
        assert_eq!(text, "nome;valor");
    }

    #[test]
    fn utf8_rejects_latin1_bytes() {
        assert!(TextEncoding::Utf8.decode(b"S\xE3o Paulo").is_none());
        assert_eq!(
            TextEncoding::Latin1.decode(b"S\xE3o Paulo").as_deref(),
            Some("São Paulo")
        );
    }

    #[test]
    fn cp850_maps_accented_letters() {
        assert_eq!(
            TextEncoding::Cp850.decode(b"Gest\xC6o").as_deref(),
            Some("Gestão")
        );
    }

    #[test]
    fn utf16_sniffs_byte_order() {
        let little = [0xFF, 0xFE, b'a', 0, b';', 0, b'b', 0];
        let big = [0xFE, 0xFF, 0, b'a', 0, b';', 0, b'b'];
        assert_eq!(TextEncoding::Utf16.decode(&little).as_deref(), Some("a;b"));
        assert_eq!(TextEncoding::Utf16.decode(&big).as_deref(), Some("a;b"));
        assert!(TextEncoding::Utf16Le.decode(&[b'a']).is_none());
    }
}
