//! Launch a target under gdbserver and attach gdb to it from a new terminal.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use crate::tubes::TubesError;
use crate::tubes::process::{Process, ProcessConfig};
use crate::logging as log;
use crate::context;

/// gdbserver announces the port it picked on stderr
pub fn parse_listening_port(line: &[u8]) -> Option<u16> {
    let line = String::from_utf8_lossy(line);
    let rest = line.trim().strip_prefix("Listening on port ")?;
    rest.trim().parse().ok()
}

fn write_gdbscript(port: u16, script: &str) -> Result<PathBuf, TubesError> {
    let mut file = tempfile::Builder::new()
        .prefix("spirit-gdb-")
        .suffix(".gdb")
        .tempfile()?;
    writeln!(file, "target remote localhost:{}", port)?;
    file.write_all(script.as_bytes())?;
    file.flush()?;

    // gdb reads the file after we return, it has to outlive the handle
    let (_file, path) = file.keep().map_err(|e| TubesError::StdIOError(e.error))?;
    Ok(path)
}

/// Spawn `argv` under gdbserver with `cfg.env` applied only to the target,
/// then open gdb in `context.terminal` running `gdbscript`.
pub async fn debug<T: AsRef<str>>(
    argv: impl AsRef<[T]>,
    cfg: &ProcessConfig,
    gdbscript: &str,
) -> Result<Process, TubesError> {
    let target = argv.as_ref().iter().map(|x| String::from(x.as_ref())).collect::<Vec<_>>();
    let binary = target.first().cloned().ok_or_else(|| {
        TubesError::LaunchError("Process argv was empty!".into())
    })?;

    let mut server_argv: Vec<String> = vec!["gdbserver".into(), "--no-disable-randomization".into()];
    if !cfg.env.is_empty() {
        server_argv.push("--wrapper".into());
        server_argv.push("env".into());
        for (key, val) in &cfg.env {
            server_argv.push(format!("{}={}", key, val));
        }
        server_argv.push("--".into());
    }
    server_argv.push("localhost:0".into());
    server_argv.extend(target);

    let server_cfg = ProcessConfig { aslr: cfg.aslr, env: Default::default() };
    let process = Process::new(&server_argv, &server_cfg).await?;

    let port = loop {
        let line = process.recvline_stderr(Duration::from_secs(5)).await?;
        log::debug(format!("gdbserver: {}", String::from_utf8_lossy(&line).trim_end()));
        if let Some(port) = parse_listening_port(&line) {
            break port;
        }
    };
    log::info(format!("gdbserver listening on port {}", port));

    let script_path = write_gdbscript(port, gdbscript)?;

    let mut terminal = context::access(|ctx| ctx.terminal.clone());
    if terminal.is_empty() {
        return Err(TubesError::LaunchError("context.terminal is empty".into()));
    }
    terminal.extend([
        "gdb".to_string(),
        "-q".to_string(),
        binary,
        "-x".to_string(),
        script_path.display().to_string(),
    ]);

    tokio::process::Command::new(&terminal[0])
        .args(&terminal[1..])
        .spawn()
        .map_err(|e| TubesError::LaunchError(format!("Failed to open '{}': {}", terminal[0], e)))?;

    Ok(process)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listening_port() {
        assert_eq!(parse_listening_port(b"Listening on port 40123\n"), Some(40123));
        assert_eq!(parse_listening_port(b"Process ./house_of_spirit created; pid = 7\n"), None);
    }

    #[test]
    fn gdbscript_file() -> anyhow::Result<()> {
        let path = write_gdbscript(1234, "b *main\n")?;
        let contents = std::fs::read_to_string(&path)?;
        std::fs::remove_file(&path)?;
        assert_eq!(contents, "target remote localhost:1234\nb *main\n");
        Ok(())
    }
}
