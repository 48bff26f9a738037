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

use crate::{driver::DriverError, signature::SignatureAlgorithm};
use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
};

/// What to do with the message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    Verify,
    Sign {
        domain: String,
        selector: String,
        key_file: PathBuf,
    },
}

/// Parsed command-line options.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Options {
    pub program_name: String,
    pub mode: Mode,
    /// Signature algorithm, signing only.
    pub algorithm: Option<SignatureAlgorithm>,
    /// Fixed value for the t= tag, signing only.
    pub timestamp: Option<u64>,
    pub verbosity: u8,
}

/// Returns the final path component of the program path.
pub fn program_name(arg0: Option<&OsStr>) -> String {
    arg0.and_then(|s| Path::new(s).file_name())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").into())
}

/// Returns the usage line.
pub fn usage(program_name: &str) -> String {
    format!(
        "{program_name}: usage: {program_name} [-d domain] [-k key] [-s selector] \
         [-a algorithm] [-t timestamp] [-v]"
    )
}

impl Options {
    /// Parses the full argument vector, program path first.
    ///
    /// Options follow getopt conventions: flags may be clustered (`-vv`),
    /// and an option value may be attached (`-dexample.com`) or given as the
    /// next argument.
    pub fn parse<I, S>(args: I) -> Result<Self, DriverError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut args = args.into_iter().map(Into::into);

        let program_name = program_name(args.next().as_deref());

        let mut domain = None;
        let mut key_file = None;
        let mut selector = None;
        let mut algorithm = None;
        let mut timestamp = None;
        let mut verbosity = 0u8;

        let mut args = args.peekable();

        while let Some(arg) = args.next() {
            let arg = arg
                .into_string()
                .map_err(|_| usage_error("invalid UTF-8 bytes in argument"))?;

            if arg == "--" {
                if args.peek().is_some() {
                    return Err(usage_error("unexpected argument"));
                }
                break;
            }

            let flags = match arg.strip_prefix('-') {
                Some(flags) if !flags.is_empty() => flags,
                _ => return Err(usage_error(format!("unexpected argument \"{arg}\""))),
            };

            for (i, c) in flags.char_indices() {
                if c == 'v' {
                    verbosity = verbosity.saturating_add(1);
                    continue;
                }

                let slot = match c {
                    'd' => &mut domain,
                    'k' => &mut key_file,
                    's' => &mut selector,
                    'a' => &mut algorithm,
                    't' => &mut timestamp,
                    c => return Err(usage_error(format!("invalid option -- {c}"))),
                };

                if slot.is_some() {
                    return Err(usage_error(format!("option -{c} given more than once")));
                }

                let attached = &flags[(i + c.len_utf8())..];
                let value = if attached.is_empty() {
                    args.next()
                        .ok_or_else(|| usage_error(format!("option requires an argument -- {c}")))?
                        .into_string()
                        .map_err(|_| usage_error("invalid UTF-8 bytes in argument"))?
                } else {
                    attached.to_owned()
                };

                *slot = Some(value);
                break;
            }
        }

        let algorithm = algorithm
            .map(|s| {
                s.parse::<SignatureAlgorithm>()
                    .map_err(|_| usage_error(format!("invalid signature algorithm \"{s}\"")))
            })
            .transpose()?;
        let timestamp = timestamp
            .map(|s| {
                s.parse::<u64>()
                    .map_err(|_| usage_error(format!("invalid timestamp \"{s}\"")))
            })
            .transpose()?;

        let mode = match (domain, key_file, selector) {
            (None, None, None) => {
                if algorithm.is_some() || timestamp.is_some() {
                    return Err(usage_error("options -a and -t require signing mode"));
                }
                Mode::Verify
            }
            (Some(domain), Some(key_file), Some(selector)) => Mode::Sign {
                domain,
                selector,
                key_file: key_file.into(),
            },
            _ => return Err(usage_error("options -d, -k and -s must be given together")),
        };

        Ok(Self {
            program_name,
            mode,
            algorithm,
            timestamp,
            verbosity,
        })
    }
}

fn usage_error(msg: impl Into<String>) -> DriverError {
    DriverError::Usage(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options, DriverError> {
        Options::parse(args.iter().copied())
    }

    #[test]
    fn parse_verify_mode() {
        let opts = parse(&["/usr/bin/dkim-testmsg", "-vv"]).unwrap();

        assert_eq!(opts.program_name, "dkim-testmsg");
        assert_eq!(opts.mode, Mode::Verify);
        assert_eq!(opts.verbosity, 2);
    }

    #[test]
    fn parse_sign_mode() {
        let opts = parse(&[
            "prog", "-dexample.com", "-k", "/tmp/key.pem", "-s", "sel", "-v", "-a",
            "ed25519-sha256", "-t1700000000",
        ])
        .unwrap();

        assert_eq!(
            opts.mode,
            Mode::Sign {
                domain: "example.com".into(),
                selector: "sel".into(),
                key_file: "/tmp/key.pem".into(),
            }
        );
        assert_eq!(opts.algorithm, Some(SignatureAlgorithm::Ed25519Sha256));
        assert_eq!(opts.timestamp, Some(1700000000));
        assert_eq!(opts.verbosity, 1);
    }

    #[test]
    fn parse_usage_errors() {
        let bad: &[&[&str]] = &[
            &["prog", "-d", "example.com"],
            &["prog", "-d", "example.com", "-s", "sel"],
            &["prog", "-k", "key"],
            &["prog", "-x"],
            &["prog", "-d"],
            &["prog", "-d", "a", "-d", "b", "-k", "k", "-s", "s"],
            &["prog", "-d", "a", "-k", "k", "-s", "s", "extra"],
            &["prog", "-t", "123"],
            &["prog", "-a", "rsa-sha256"],
            &["prog", "-d", "a", "-k", "k", "-s", "s", "-a", "rsa-md5"],
            &["prog", "-d", "a", "-k", "k", "-s", "s", "-t", "yesterday"],
        ];

        for args in bad {
            assert!(matches!(parse(args), Err(DriverError::Usage(_))), "{args:?}");
        }
    }

    #[test]
    fn usage_text() {
        assert_eq!(
            usage("prog"),
            "prog: usage: prog [-d domain] [-k key] [-s selector] [-a algorithm] [-t timestamp] [-v]"
        );
    }
}
