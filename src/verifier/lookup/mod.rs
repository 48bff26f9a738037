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

//! Public key record lookup.

#[cfg(feature = "hickory-resolver")]
mod hickory_resolver;

use std::{
    future::Future,
    io::{self, ErrorKind},
    time::Duration,
};
use tokio::time;
use tracing::trace;

/// A trait for entities that perform DNS resolution of TXT records.
pub trait LookupTxt: Send + Sync {
    /// The answer consisting of TXT records found.
    type Answer: IntoIterator<Item = io::Result<Vec<u8>>>;
    /// The future resolving to the query’s answer.
    type Query<'a>: Future<Output = io::Result<Self::Answer>> + Send + 'a
    where
        Self: 'a;

    /// Looks up the TXT records at the given absolute domain name, given in
    /// A-label form with a trailing dot (eg `sel._domainkey.example.com.`).
    ///
    /// A non-existent name should be reported with `ErrorKind::NotFound`, an
    /// unusable name with `ErrorKind::InvalidInput`.
    fn lookup_txt(&self, domain: &str) -> Self::Query<'_>;
}

/// At most this many TXT records at one name are tried.
const MAX_RECORDS: usize = 3;

/// Looks up the key records published for a domain and selector.
///
/// Records that are not UTF-8 are kept as `ErrorKind::InvalidData` errors, so
/// that they can be reported in turn.
pub async fn look_up_records<T>(
    resolver: &T,
    domain: &str,
    selector: &str,
    timeout: Duration,
) -> io::Result<Vec<io::Result<String>>>
where
    T: LookupTxt + ?Sized,
{
    let dname = format!("{selector}._domainkey.{domain}.");

    trace!(%dname, "looking up key record");

    let txts = match time::timeout(timeout, resolver.lookup_txt(&dname)).await {
        Ok(r) => r?,
        Err(_) => return Err(ErrorKind::TimedOut.into()),
    };

    let records = txts
        .into_iter()
        .take(MAX_RECORDS)
        .map(|txt| {
            txt.and_then(|s| String::from_utf8(s).map_err(|_| ErrorKind::InvalidData.into()))
        })
        .collect();

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;

    struct MockLookupTxt;

    impl LookupTxt for MockLookupTxt {
        type Answer = Vec<io::Result<Vec<u8>>>;
        type Query<'a> = Pin<Box<dyn Future<Output = io::Result<Self::Answer>> + Send + 'a>>;

        fn lookup_txt(&self, domain: &str) -> Self::Query<'_> {
            let domain = domain.to_owned();

            Box::pin(async move {
                match domain.as_str() {
                    "sel._domainkey.example.com." => Ok(vec![
                        Ok(b"one".to_vec()),
                        Ok(b"two\xff\x00".to_vec()),
                        Ok(b"three".to_vec()),
                        Ok(b"four".to_vec()),
                    ]),
                    "slow._domainkey.example.com." => {
                        time::sleep(Duration::from_secs(60)).await;
                        Ok(vec![])
                    }
                    _ => Err(ErrorKind::NotFound.into()),
                }
            })
        }
    }

    #[tokio::test]
    async fn look_up_records_ok() {
        let timeout = Duration::from_secs(1);

        let records = look_up_records(&MockLookupTxt, "example.com", "sel", timeout)
            .await
            .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].as_ref().unwrap(), "one");
        assert_eq!(records[1].as_ref().unwrap_err().kind(), ErrorKind::InvalidData);
        assert_eq!(records[2].as_ref().unwrap(), "three");

        let error = look_up_records(&MockLookupTxt, "example.org", "sel", timeout)
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn look_up_records_timeout() {
        let error = look_up_records(&MockLookupTxt, "example.com", "slow", Duration::from_secs(10))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::TimedOut);
    }
}
