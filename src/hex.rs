// Copyright (C) 2022 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hex dumps of packet data, truncated so a big payload doesn't flood the log.

use pretty_hex::PrettyHex;

pub struct LimitedHex<'a> {
    inner: &'a [u8],
    max_bytes: usize,
}

impl<'a> LimitedHex<'a> {
    pub fn new(inner: &'a [u8], max_bytes: usize) -> Self {
        Self { inner, max_bytes }
    }
}

impl<'a> std::fmt::Debug for LimitedHex<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = &self.inner[..self.inner.len().min(self.max_bytes)];
        writeln!(f, "Length: {0} (0x{0:x}) bytes", self.inner.len())?;
        write!(
            f,
            "{:#?}",
            shown.hex_conf(pretty_hex::HexConfig {
                title: false,
                ..Default::default()
            })
        )?;
        let omitted = self.inner.len() - shown.len();
        if omitted > 0 {
            write!(f, "\n...{0} (0x{0:x}) bytes not shown...", omitted)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::LimitedHex;

    #[test]
    fn truncates() {
        let data = [0xabu8; 100];
        let s = format!("{:?}", LimitedHex::new(&data, 16));
        assert!(s.starts_with("Length: 100 (0x64) bytes"), "{}", s);
        assert!(s.ends_with("...84 (0x54) bytes not shown..."), "{}", s);
    }

    #[test]
    fn short_input_untruncated() {
        let s = format!("{:?}", LimitedHex::new(b"\x80\x00", 16));
        assert!(!s.contains("not shown"), "{}", s);
    }
}
