//! Byte source for the decoder: offset tracking and a hard input ceiling.

use std::io::{BufRead, ErrorKind, Read};

use super::DecodeError;

pub(crate) struct StreamReader<R> {
    inner: R,
    offset: u64,
    limit: u64,
}

impl<R: BufRead> StreamReader<R> {
    pub(crate) fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            offset: 0,
            limit,
        }
    }

    /// Number of bytes consumed so far.
    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// Fail before reading `len` more bytes would cross the ceiling.
    fn reserve(&self, len: u64) -> Result<(), DecodeError> {
        check_budget(self.offset, len, self.limit)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let [byte] = self.read_array::<1>()?;
        Ok(byte)
    }

    pub(crate) fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        self.reserve(N as u64)?;
        let mut buf = [0_u8; N];
        let mut filled = 0;
        while filled < N {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(DecodeError::Truncated {
                        offset: self.offset,
                    })
                }
                Ok(n) => {
                    filled += n;
                    self.offset += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(buf)
    }

    /// Read a length-prefixed payload. The length is checked against the
    /// remaining budget before anything is allocated.
    pub(crate) fn read_bytes(&mut self, len: u64) -> Result<Vec<u8>, DecodeError> {
        self.reserve(len)?;
        let mut buf = Vec::new();
        let n = self.inner.by_ref().take(len).read_to_end(&mut buf)?;
        self.offset += n as u64;
        if (n as u64) < len {
            return Err(DecodeError::Truncated {
                offset: self.offset,
            });
        }
        Ok(buf)
    }

    /// Read up to the next `\n`, which is consumed but not returned.
    pub(crate) fn read_line(&mut self) -> Result<Vec<u8>, DecodeError> {
        let mut line = Vec::new();
        loop {
            let (offset, limit) = (self.offset, self.limit);
            let (found, used) = {
                let available = match self.inner.fill_buf() {
                    Ok(available) => available,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                };
                if available.is_empty() {
                    return Err(DecodeError::Truncated { offset });
                }
                let (found, end) = match available.iter().position(|&b| b == b'\n') {
                    Some(pos) => (true, pos + 1),
                    None => (false, available.len()),
                };
                check_budget(offset, end as u64, limit)?;
                line.extend_from_slice(&available[..end]);
                (found, end)
            };
            self.inner.consume(used);
            self.offset += used as u64;
            if found {
                line.pop();
                return Ok(line);
            }
        }
    }
}

fn check_budget(offset: u64, len: u64, limit: u64) -> Result<(), DecodeError> {
    let end = offset.saturating_add(len);
    if end > limit {
        return Err(DecodeError::LimitExceeded {
            limit: "input bytes",
            value: end,
            max: limit,
        });
    }
    Ok(())
}
