use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left unescaped by `encodeURIComponent`
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode a file name for use in a URL path segment or a
/// `Content-Disposition` filename.
pub fn encode_component(name: &str) -> String {
    utf8_percent_encode(name, COMPONENT).to_string()
}

/// `Content-Disposition` value for a download of `name`
pub fn attachment_disposition(name: &str) -> String {
    format!("attachment; filename=\"{}\"", encode_component(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_component() {
        assert_eq!(encode_component("plain-name_1.txt"), "plain-name_1.txt");
        assert_eq!(encode_component("my file.pdf"), "my%20file.pdf");
        assert_eq!(encode_component("a\"b.txt"), "a%22b.txt");
        assert_eq!(encode_component("图片.png"), "%E5%9B%BE%E7%89%87.png");
        assert_eq!(encode_component("(1)!.jpg"), "(1)!.jpg");
    }

    #[test]
    fn test_attachment_disposition_is_ascii() {
        let value = attachment_disposition("报告 final.xlsx");
        assert!(value.is_ascii());
        assert!(value.starts_with("attachment; filename=\""));
    }
}
