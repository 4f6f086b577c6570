use reporter_api::TransportError;

/// Максимальная длина строки от агрегатора.
pub const MAX_LINE: usize = 64 * 1024;

/// Фреймы, разделённые переводом строки.
pub struct LinesFraming {
    max_length: usize,
}

impl Default for LinesFraming {
    fn default() -> Self {
        Self { max_length: MAX_LINE }
    }
}

impl LinesFraming {
    /// `max_length = 0` отключает лимит.
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Снять один фрейм с начала `buf`.
    ///
    /// Возвращает строку (без `\n` / `\r\n`) и число съеденных байт,
    /// либо `None`, если полной строки ещё нет.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, TransportError> {
        let pos = match buf.iter().position(|&b| b == b'\n') {
            Some(p) => p,
            None => {
                if self.max_length > 0 && buf.len() > self.max_length {
                    return Err(TransportError::format_err(format!(
                        "line too long: {} bytes (max {}) and no newline found",
                        buf.len(),
                        self.max_length
                    )));
                }
                return Ok(None);
            }
        };

        let consumed = pos + 1;

        let line = &buf[..pos];
        let line = if line.last() == Some(&b'\r') {
            &line[..line.len() - 1]
        } else {
            line
        };

        if self.max_length > 0 && line.len() > self.max_length {
            return Err(TransportError::format_err(format!(
                "line too long: {} bytes (max {})",
                line.len(),
                self.max_length
            )));
        }

        Ok(Some((line.to_vec(), consumed)))
    }

    pub fn encode(&self, data: &[u8], buf: &mut Vec<u8>) {
        buf.extend_from_slice(data);
        buf.push(b'\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_line_waits_for_more() {
        let f = LinesFraming::default();
        assert!(f.decode(b"{\"success\":tr").unwrap().is_none());
    }

    #[test]
    fn strips_crlf_and_reports_consumed() {
        let f = LinesFraming::default();
        let (line, used) = f.decode(b"abc\r\nrest").unwrap().unwrap();
        assert_eq!(line, b"abc");
        assert_eq!(used, 5);
    }

    #[test]
    fn overlong_line_is_format_error() {
        let f = LinesFraming::new(4);
        let err = f.decode(b"toolong").unwrap_err();
        assert_eq!(err.kind(), reporter_api::ErrorKind::Format);
        let err = f.decode(b"12345\n").unwrap_err();
        assert_eq!(err.kind(), reporter_api::ErrorKind::Format);
    }

    #[test]
    fn encode_appends_newline() {
        let mut buf = Vec::new();
        LinesFraming::default().encode(b"x", &mut buf);
        assert_eq!(buf, b"x\n");
    }
}
