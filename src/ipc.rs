//! Inter-process messaging for the bar.
//!
//! Each running bar instance owns a named pipe (a "channel") under
//! [`CHANNEL_DIR`], with its process id encoded in the filename. The
//! `xbar-msg` binary broadcasts a `type:payload` line to one or all of
//! them. All parsing, validation, and delivery logic lives here so it
//! can be tested; the binary only maps outcomes to exit codes and
//! stderr lines.

use std::fmt;
use std::fs;
use std::io::Write as _;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use strum::{AsRefStr, EnumString};

use thiserror::Error;

use tracing::debug;

/// Directory holding the channel pipes.
pub const CHANNEL_DIR: &str = "/tmp";
/// Channel filename prefix; the owning process id follows the dot.
pub const CHANNEL_PREFIX: &str = "xbar_mqueue.";
/// Namespace prefix hook payloads are normalized into.
pub const HOOK_PREFIX: &str = "module/";

const USAGE_GENERAL: &str = "<command=(action|cmd|hook)> <payload> [...]";
const USAGE_HOOK: &str = "hook <module-name> <hook-index>";

/// The enumerated set of accepted message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MessageType {
    Action,
    Cmd,
    Hook,
}

/// Everything that can terminate a messaging run, each with its own
/// exit code.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IpcError {
    #[error("{0}")]
    Generic(String),
    #[error("There are no active ipc channels")]
    NoChannels,
    #[error("\"{0}\" is not a valid type.")]
    MessageType(String),
    #[error("No process with pid {0}")]
    InvalidPid(String),
    #[error("No channel available for pid {0}")]
    InvalidChannel(String),
    #[error("Failed to write \"{payload}\" to \"{channel}\" (err: {err})")]
    Write {
        payload: String,
        channel: String,
        err: String,
    },
    #[error("Usage: xbar-msg [-p pid] {0}")]
    Usage(&'static str),
}

impl IpcError {
    /// The process exit code reported for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            IpcError::Generic(_) => 1,
            IpcError::NoChannels => 2,
            IpcError::MessageType(_) => 3,
            IpcError::InvalidPid(_) => 4,
            IpcError::InvalidChannel(_) => 5,
            IpcError::Write { .. } => 6,
            IpcError::Usage(_) => 127,
        }
    }
}

/// A validated messaging request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Restrict delivery to the channel of this process id.
    pub pid: Option<u32>,
    pub kind: MessageType,
    pub payload: String,
}

impl Request {
    /// Parses the full argument list (everything after argv[0]).
    pub fn parse(args: &[String]) -> Result<Request, IpcError> {
        let (pid, rest) = split_pid(args);
        let pid = match pid {
            Some(p) => Some(p.parse().map_err(|_| IpcError::InvalidPid(p.clone()))?),
            None => None,
        };
        Request::parse_body(pid, rest)
    }

    /// Parses the arguments following the optional `-p` pair.
    pub fn parse_body(pid: Option<u32>, args: &[String]) -> Result<Request, IpcError> {
        if args.len() < 2 {
            return Err(IpcError::Usage(USAGE_GENERAL));
        }

        let kind = MessageType::from_str(&args[0])
            .map_err(|_| IpcError::MessageType(args[0].clone()))?;

        let mut payload = args[1].clone();
        let rest = &args[2..];

        if kind == MessageType::Hook {
            // hooks take exactly one more argument: the hook index,
            // appended to the module-namespaced payload
            if rest.len() != 1 {
                return Err(IpcError::Usage(USAGE_HOOK));
            }
            if !payload.starts_with(HOOK_PREFIX) {
                payload = format!("{}{}", HOOK_PREFIX, payload);
            }
            payload.push_str(&rest[0]);
        }

        Ok(Request { pid, kind, payload })
    }

    /// The colon-joined line written to each channel.
    pub fn message(&self) -> String {
        format!("{}:{}", self.kind.as_ref(), self.payload)
    }
}

/// Splits a leading `-p <pid>` pair off the argument list.
pub fn split_pid(args: &[String]) -> (Option<&String>, &[String]) {
    if args.len() >= 2 && args[0] == "-p" {
        (Some(&args[1]), &args[2..])
    } else {
        (None, args)
    }
}

/// Checks that the targeted process is running and owns a usable
/// channel pipe, returning the parsed pid filter.
pub fn validate_target(pid: &str, dir: &Path) -> Result<u32, IpcError> {
    if !Path::new("/proc").join(pid).exists() {
        return Err(IpcError::InvalidPid(pid.to_string()));
    }
    let channel = dir.join(format!("{}{}", CHANNEL_PREFIX, pid));
    if !is_fifo(&channel) {
        return Err(IpcError::InvalidChannel(pid.to_string()));
    }
    pid.parse().map_err(|_| IpcError::InvalidPid(pid.to_string()))
}

/// A channel pipe discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub path: PathBuf,
    /// Process id encoded in the filename; 0 if unparsable.
    pub pid: u32,
}

/// Enumerates the channel pipes in the given directory, sorted by
/// path for deterministic delivery order.
pub fn discover_channels(dir: &Path) -> std::io::Result<Vec<Channel>> {
    let mut channels = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(CHANNEL_PREFIX) {
            let path = entry.path();
            let pid = channel_pid(&path).unwrap_or(0);
            channels.push(Channel { path, pid });
        }
    }
    channels.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(channels)
}

/// Parses the owning process id out of a channel filename.
pub fn channel_pid(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_string_lossy();
    let (_, pid) = name.rsplit_once('.')?;
    pid.parse().ok()
}

fn is_fifo(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false)
}

fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// One per-channel outcome during a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The payload was written to a live channel.
    Wrote { channel: PathBuf, payload: String },
    /// A channel whose owner is gone was removed.
    RemovedStale { channel: PathBuf },
    /// A stale channel could not be removed; delivery continues.
    StaleRemovalFailed { channel: PathBuf, err: String },
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Wrote { channel, payload } => {
                write!(
                    f,
                    "Successfully wrote \"{}\" to \"{}\"",
                    payload,
                    channel.display()
                )
            }
            Delivery::RemovedStale { channel } => {
                write!(f, "Removed stale ipc channel: {}", channel.display())
            }
            Delivery::StaleRemovalFailed { channel, err } => {
                write!(
                    f,
                    "Could not remove stale ipc channel {}: {}",
                    channel.display(),
                    err
                )
            }
        }
    }
}

/// Writes the request to each live channel, removing stale channels
/// left behind by crashed processes along the way.
///
/// A stale channel whose owner no longer exists is deleted and never
/// written to, regardless of the pid filter. The first write failure
/// ends the run.
pub fn broadcast(
    request: &Request,
    dir: &Path,
    report: &mut dyn FnMut(Delivery),
) -> Result<(), IpcError> {
    let channels = discover_channels(dir).map_err(|e| IpcError::Generic(e.to_string()))?;
    if channels.is_empty() {
        return Err(IpcError::NoChannels);
    }
    debug!("found {} ipc channel(s)", channels.len());

    let payload = request.message();

    for channel in channels {
        if !process_alive(channel.pid) {
            match fs::remove_file(&channel.path) {
                Ok(()) => report(Delivery::RemovedStale {
                    channel: channel.path,
                }),
                Err(e) => report(Delivery::StaleRemovalFailed {
                    channel: channel.path,
                    err: e.to_string(),
                }),
            }
        } else if request.pid.map_or(true, |p| p == channel.pid) {
            write_payload(&channel.path, &payload).map_err(|e| IpcError::Write {
                payload: payload.clone(),
                channel: channel.path.display().to_string(),
                err: e.to_string(),
            })?;
            report(Delivery::Wrote {
                channel: channel.path,
                payload: payload.clone(),
            });
        }
    }

    Ok(())
}

fn write_payload(path: &Path, payload: &str) -> std::io::Result<()> {
    let mut pipe = fs::OpenOptions::new().write(true).open(path)?;
    writeln!(pipe, "{}", payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    struct TempDir(PathBuf);

    impl TempDir {
        fn new(tag: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "xbar-msg-test-{}-{}",
                tag,
                std::process::id()
            ));
            let _ = fs::remove_dir_all(&path);
            fs::create_dir_all(&path).unwrap();
            TempDir(path)
        }

        fn path(&self) -> &Path {
            &self.0
        }

        fn channel(&self, pid: u32) -> PathBuf {
            let path = self.0.join(format!("{}{}", CHANNEL_PREFIX, pid));
            fs::write(&path, b"").unwrap();
            path
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    // a pid that cannot exist on a running system
    const DEAD_PID: u32 = u32::MAX;

    #[test]
    fn hook_payload_gets_module_prefix_and_index() {
        let request = Request::parse(&args(&["hook", "foo", "3"])).unwrap();
        assert_eq!(request.kind, MessageType::Hook);
        assert_eq!(request.payload, "module/foo3");
        assert_eq!(request.message(), "hook:module/foo3");
    }

    #[test]
    fn prefixed_hook_payload_is_left_alone() {
        let request = Request::parse(&args(&["hook", "module/date", "1"])).unwrap();
        assert_eq!(request.message(), "hook:module/date1");
    }

    #[test]
    fn hook_arity_is_exactly_one_index() {
        assert_eq!(
            Request::parse(&args(&["hook", "foo"])),
            Err(IpcError::Usage(USAGE_HOOK))
        );
        assert_eq!(
            Request::parse(&args(&["hook", "foo", "1", "2"])),
            Err(IpcError::Usage(USAGE_HOOK))
        );
    }

    #[test]
    fn unknown_type_fails_with_code_3() {
        let err = Request::parse(&args(&["foo", "bar"])).unwrap_err();
        assert_eq!(err, IpcError::MessageType("foo".into()));
        assert_eq!(err.to_string(), "\"foo\" is not a valid type.");
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn missing_arguments_are_usage_errors() {
        let err = Request::parse(&args(&["cmd"])).unwrap_err();
        assert_eq!(err.exit_code(), 127);
        assert_eq!(Request::parse(&[]).unwrap_err().exit_code(), 127);
    }

    #[test]
    fn pid_flag_is_split_off_the_front() {
        let all = args(&["-p", "1234", "cmd", "play"]);
        let (pid, rest) = split_pid(&all);
        assert_eq!(pid.map(String::as_str), Some("1234"));
        assert_eq!(rest, &all[2..]);

        let request = Request::parse(&all).unwrap();
        assert_eq!(request.pid, Some(1234));
        assert_eq!(request.message(), "cmd:play");

        let bare = args(&["cmd", "play"]);
        let (pid, rest) = split_pid(&bare);
        assert!(pid.is_none());
        assert_eq!(rest, &bare[..]);
    }

    #[test]
    fn exit_codes_match_failure_classes() {
        assert_eq!(IpcError::Generic("x".into()).exit_code(), 1);
        assert_eq!(IpcError::NoChannels.exit_code(), 2);
        assert_eq!(IpcError::MessageType("x".into()).exit_code(), 3);
        assert_eq!(IpcError::InvalidPid("1".into()).exit_code(), 4);
        assert_eq!(IpcError::InvalidChannel("1".into()).exit_code(), 5);
        let write = IpcError::Write {
            payload: "p".into(),
            channel: "c".into(),
            err: "e".into(),
        };
        assert_eq!(write.exit_code(), 6);
        assert_eq!(IpcError::Usage(USAGE_GENERAL).exit_code(), 127);
    }

    #[test]
    fn missing_process_is_an_invalid_pid() {
        let dir = TempDir::new("invalid-pid");
        let err = validate_target(&DEAD_PID.to_string(), dir.path()).unwrap_err();
        assert_eq!(err, IpcError::InvalidPid(DEAD_PID.to_string()));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn live_process_without_pipe_is_an_invalid_channel() {
        let dir = TempDir::new("invalid-channel");
        let pid = std::process::id();
        let err = validate_target(&pid.to_string(), dir.path()).unwrap_err();
        assert_eq!(err, IpcError::InvalidChannel(pid.to_string()));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn channel_pids_come_from_the_filename() {
        assert_eq!(
            channel_pid(Path::new("/tmp/xbar_mqueue.1234")),
            Some(1234)
        );
        assert_eq!(channel_pid(Path::new("/tmp/xbar_mqueue.nonsense")), None);
        assert_eq!(channel_pid(Path::new("/tmp/no-dot")), None);
    }

    #[test]
    fn empty_directory_reports_no_channels() {
        let dir = TempDir::new("no-channels");
        let request = Request::parse(&args(&["cmd", "play"])).unwrap();
        let err = broadcast(&request, dir.path(), &mut |_| {}).unwrap_err();
        assert_eq!(err, IpcError::NoChannels);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn broadcast_writes_to_live_channels_and_removes_stale_ones() {
        let dir = TempDir::new("broadcast");
        let live_pid = std::process::id();
        let live = dir.channel(live_pid);
        let stale = dir.channel(DEAD_PID);

        let request = Request::parse(&args(&["cmd", "play"])).unwrap();
        let mut deliveries = Vec::new();
        broadcast(&request, dir.path(), &mut |d| deliveries.push(d)).unwrap();

        assert!(deliveries.contains(&Delivery::RemovedStale {
            channel: stale.clone()
        }));
        assert!(deliveries.contains(&Delivery::Wrote {
            channel: live.clone(),
            payload: "cmd:play".into()
        }));
        assert!(!stale.exists());
        assert_eq!(fs::read_to_string(&live).unwrap(), "cmd:play\n");
    }

    #[test]
    fn stale_channels_are_removed_even_under_a_pid_filter() {
        let dir = TempDir::new("filtered");
        let live_pid = std::process::id();
        let live = dir.channel(live_pid);
        let stale = dir.channel(DEAD_PID);

        // filter targets a pid that matches no channel: nothing is
        // written, but the stale channel still gets cleaned up
        let request = Request {
            pid: Some(1),
            kind: MessageType::Cmd,
            payload: "play".into(),
        };
        let mut deliveries = Vec::new();
        broadcast(&request, dir.path(), &mut |d| deliveries.push(d)).unwrap();

        assert!(!stale.exists());
        assert_eq!(
            deliveries,
            vec![Delivery::RemovedStale { channel: stale }]
        );
        assert_eq!(fs::read_to_string(&live).unwrap(), "");
    }
}
