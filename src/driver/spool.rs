// dkim-testmsg – sign or verify an email message with DKIM
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

use std::io::{self, Seek, SeekFrom, Write};
use tempfile::NamedTempFile;
use tracing::trace;

/// A copy of the input message in a temporary file. The file is deleted when
/// the spool is dropped.
pub struct Spool {
    file: NamedTempFile,
}

impl Spool {
    pub fn create() -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(concat!(env!("CARGO_PKG_NAME"), "."))
            .tempfile()?;

        trace!(path = %file.path().display(), "spool file created");

        Ok(Self { file })
    }

    pub fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk)
    }

    /// Copies the spooled bytes, from the start, to `output`.
    pub fn copy_to<W: Write + ?Sized>(&mut self, output: &mut W) -> io::Result<u64> {
        let file = self.file.as_file_mut();
        file.flush()?;
        file.seek(SeekFrom::Start(0))?;
        io::copy(file, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spool_round_trip_and_cleanup() {
        let mut spool = Spool::create().unwrap();
        let path = spool.file.path().to_owned();

        spool.write_chunk(b"Subject: hi\r\n").unwrap();
        spool.write_chunk(b"\r\nbody\n").unwrap();

        let mut out = vec![];
        assert_eq!(spool.copy_to(&mut out).unwrap(), 20);
        assert_eq!(out, b"Subject: hi\r\n\r\nbody\n");

        assert!(path.exists());
        drop(spool);
        assert!(!path.exists());
    }
}
