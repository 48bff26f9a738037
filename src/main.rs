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

use dkim_testmsg::driver::{self, ExitStatus, Options};
use hickory_resolver::TokioAsyncResolver;
use std::{
    env,
    ffi::OsString,
    io::{self, stderr, Write},
    process::ExitCode,
};
use tokio::runtime;
use tracing::Level;

fn main() -> ExitCode {
    let args: Vec<OsString> = env::args_os().collect();

    let options = match Options::parse(args.iter().cloned()) {
        Ok(options) => options,
        Err(e) => {
            let program_name = driver::program_name(args.first().map(|s| s.as_os_str()));
            let _ = writeln!(stderr(), "{program_name}: {e}");
            let _ = writeln!(stderr(), "{}", driver::usage(&program_name));
            return e.exit_status().into();
        }
    };

    let level = match options.verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    let program_name = &options.program_name;

    let runtime = match runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = writeln!(stderr(), "{program_name}: runtime: {e}");
            return ExitStatus::OsErr.into();
        }
    };

    let result = runtime.block_on(async {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            tracing::debug!("no system resolver configuration, using defaults: {e}");
            TokioAsyncResolver::tokio(Default::default(), Default::default())
        });

        let stdin = io::stdin().lock();
        let stdout = io::stdout().lock();

        driver::run(&options, stdin, stdout, &resolver).await
    });

    match result {
        Ok(()) => ExitStatus::Ok.into(),
        Err(e) => {
            let _ = writeln!(stderr(), "{program_name}: {e}");
            e.exit_status().into()
        }
    }
}
