//! Linux backend: evdev character devices plus inotify hot-plug.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use evdev::EventType;
use evdev::raw_stream::RawDevice;
use nebula_config::GamepadConfig;
use tracing::{debug, trace, warn};

use super::evdev_decoder::{AbsRange, EventOutcome, EvdevLayout, is_event_node};
use super::{Backend, PollMode};
use crate::error::GamepadError;
use crate::guid;
use crate::registry::{DeviceDescriptor, JoystickId, JoystickSlot, MAX_JOYSTICKS, Registry};

const INPUT_DIR: &str = "/dev/input";

const INOTIFY_HEADER: usize = std::mem::size_of::<libc::inotify_event>();

#[derive(Debug, PartialEq, Eq)]
enum NodeChange {
    Added(String),
    Removed(String),
}

/// Split a buffer of `inotify_event` records into node changes.
fn parse_inotify_events(buf: &[u8]) -> Vec<NodeChange> {
    let mut changes = Vec::new();
    let mut offset = 0;
    while offset + INOTIFY_HEADER <= buf.len() {
        let field = |at: usize| {
            let start = offset + at;
            u32::from_ne_bytes([buf[start], buf[start + 1], buf[start + 2], buf[start + 3]])
        };
        let mask = field(4);
        let len = field(12) as usize;
        let name_start = offset + INOTIFY_HEADER;
        let name_end = (name_start + len).min(buf.len());
        let name_bytes = &buf[name_start..name_end];
        let name_len = name_bytes.iter().position(|b| *b == 0).unwrap_or(name_bytes.len());
        let name = String::from_utf8_lossy(&name_bytes[..name_len]).into_owned();
        offset = name_start + len;

        if !is_event_node(&name) {
            continue;
        }
        if mask & (libc::IN_CREATE | libc::IN_ATTRIB) != 0 {
            changes.push(NodeChange::Added(name));
        } else if mask & libc::IN_DELETE != 0 {
            changes.push(NodeChange::Removed(name));
        }
    }
    changes
}

/// Non-blocking inotify watch on the input device directory.
struct DeviceWatch {
    fd: OwnedFd,
}

impl DeviceWatch {
    fn new(dir: &Path) -> io::Result<Self> {
        // SAFETY: plain syscall; the returned descriptor is owned below.
        let raw = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `raw` is a fresh descriptor nobody else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let path = CString::new(dir.as_os_str().as_bytes())?;
        // SAFETY: `path` is NUL terminated and outlives the call.
        let wd = unsafe {
            libc::inotify_add_watch(
                fd.as_raw_fd(),
                path.as_ptr(),
                libc::IN_CREATE | libc::IN_ATTRIB | libc::IN_DELETE,
            )
        };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    fn read_changes(&self) -> Vec<NodeChange> {
        let mut changes = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            // SAFETY: `buf` is valid for `buf.len()` bytes.
            let n = unsafe { libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
            if n <= 0 {
                break;
            }
            changes.extend(parse_inotify_events(&buf[..n as usize]));
        }
        changes
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we hold open.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// An open evdev node bound to a registry slot.
struct LinuxJoystick {
    device: RawDevice,
    path: PathBuf,
    layout: EvdevLayout,
    abs_codes: Vec<u16>,
}

impl LinuxJoystick {
    /// Re-read the full absolute and key state from the kernel.
    fn resync(&mut self, slot: &mut JoystickSlot) -> io::Result<()> {
        let abs = self.device.get_abs_state()?;
        self.layout.apply_abs_state(
            slot,
            self.abs_codes
                .iter()
                .map(|code| (*code, abs[usize::from(*code)].value)),
        );
        let pressed: Vec<u16> = self.device.get_key_state()?.iter().map(|k| k.code()).collect();
        self.layout.apply_key_state(slot, &pressed);
        Ok(())
    }

    /// Apply every queued event without blocking.
    fn drain(&mut self, slot: &mut JoystickSlot) -> io::Result<()> {
        loop {
            let events: Vec<(u16, u16, i32)> = match self.device.fetch_events() {
                Ok(events) => events
                    .map(|e| (e.event_type().0, e.code(), e.value()))
                    .collect(),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if events.is_empty() {
                return Ok(());
            }
            for (event_type, code, value) in events {
                trace!(event_type, code, value, path = %self.path.display(), "evdev event");
                if self.layout.handle_event(slot, event_type, code, value) == EventOutcome::Resync {
                    self.resync(slot)?;
                }
            }
        }
    }
}

/// evdev + inotify backend.
pub struct LinuxBackend {
    dir: PathBuf,
    watch: Option<DeviceWatch>,
    devices: [Option<LinuxJoystick>; MAX_JOYSTICKS],
}

impl LinuxBackend {
    fn open_device(&mut self, registry: &mut Registry, path: &Path) -> Result<(), GamepadError> {
        if self.devices.iter().flatten().any(|d| d.path == path) {
            return Ok(());
        }

        let device = RawDevice::open(path)?;
        set_nonblocking(device.as_raw_fd())?;
        if !device.supported_events().contains(EventType::ABSOLUTE) {
            return Err(GamepadError::NotAJoystick(path.display().to_string()));
        }

        let abs_info = device.get_abs_state()?;
        let abs_codes: Vec<u16> = device
            .supported_absolute_axes()
            .map(|axes| axes.iter().map(|a| a.0).collect())
            .unwrap_or_default();
        let key_codes: Vec<u16> = device
            .supported_keys()
            .map(|keys| keys.iter().map(|k| k.code()).collect())
            .unwrap_or_default();
        let layout = EvdevLayout::new(
            key_codes,
            abs_codes.iter().map(|code| {
                let info = abs_info[usize::from(*code)];
                (
                    *code,
                    AbsRange {
                        minimum: info.minimum,
                        maximum: info.maximum,
                    },
                )
            }),
        );

        let name = device.name().unwrap_or("Unknown").to_string();
        let input_id = device.input_id();
        let desc = DeviceDescriptor {
            guid: guid::from_input_id(
                input_id.bus_type().0,
                input_id.vendor(),
                input_id.product(),
                input_id.version(),
                &name,
            ),
            name,
            axis_count: layout.axis_count(),
            button_count: layout.button_count(),
            hat_count: layout.hat_count(),
        };

        let id = registry.alloc_slot(&desc).ok_or(GamepadError::RegistryFull)?;
        let mut joystick = LinuxJoystick {
            device,
            path: path.to_path_buf(),
            layout,
            abs_codes,
        };
        if let Err(e) = joystick.resync(registry.slot_mut(id)) {
            registry.free_slot(id);
            return Err(e.into());
        }
        registry.connect(id);
        debug!(slot = id.index(), path = %path.display(), "Opened evdev joystick");
        self.devices[id.index()] = Some(joystick);
        Ok(())
    }

    fn try_open(&mut self, registry: &mut Registry, path: &Path) {
        match self.open_device(registry, path) {
            Ok(()) => {}
            Err(e @ (GamepadError::NotAJoystick(_) | GamepadError::Io(_))) => {
                debug!(path = %path.display(), error = %e, "Skipping input device");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Could not register joystick"),
        }
    }

    fn close(&mut self, registry: &mut Registry, id: JoystickId) {
        self.devices[id.index()] = None;
        registry.free_slot(id);
    }
}

impl Backend for LinuxBackend {
    const MAX_SUPPORTED_GAMEPADS: usize = 4;

    fn new(_config: &GamepadConfig) -> Self {
        Self {
            dir: PathBuf::from(INPUT_DIR),
            watch: None,
            devices: std::array::from_fn(|_| None),
        }
    }

    fn init(&mut self, registry: &mut Registry) -> bool {
        self.watch = match DeviceWatch::new(&self.dir) {
            Ok(watch) => Some(watch),
            Err(e) => {
                warn!(error = %e, "inotify unavailable, joystick hot-plug disabled");
                None
            }
        };

        let mut paths: Vec<PathBuf> = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .flatten()
                .filter(|e| e.file_name().to_str().is_some_and(is_event_node))
                .map(|e| e.path())
                .collect(),
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "Cannot scan input devices");
                Vec::new()
            }
        };
        paths.sort();
        for path in paths {
            self.try_open(registry, &path);
        }
        true
    }

    fn terminate(&mut self, registry: &mut Registry) {
        for index in 0..MAX_JOYSTICKS {
            if self.devices[index].is_some()
                && let Some(id) = JoystickId::new(index)
            {
                self.close(registry, id);
            }
        }
        self.watch = None;
    }

    fn detect(&mut self, registry: &mut Registry) {
        let Some(watch) = &self.watch else {
            return;
        };
        for change in watch.read_changes() {
            match change {
                NodeChange::Added(name) => {
                    let path = self.dir.join(name);
                    self.try_open(registry, &path);
                }
                NodeChange::Removed(name) => {
                    let path = self.dir.join(name);
                    let found = self
                        .devices
                        .iter()
                        .position(|d| d.as_ref().is_some_and(|d| d.path == path));
                    if let Some(id) = found.and_then(JoystickId::new) {
                        self.close(registry, id);
                    }
                }
            }
        }
    }

    fn poll(&mut self, registry: &mut Registry, id: JoystickId, _mode: PollMode) -> bool {
        // evdev delivers one interleaved stream, so every mode drains it.
        let Some(joystick) = self.devices[id.index()].as_mut() else {
            return false;
        };
        match joystick.drain(registry.slot_mut(id)) {
            Ok(()) => true,
            Err(e) if e.raw_os_error() == Some(libc::ENODEV) => {
                self.close(registry, id);
                false
            }
            Err(e) => {
                debug!(slot = id.index(), error = %e, "Transient evdev read error");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(mask: u32, name: &str) -> Vec<u8> {
        let padded = (name.len() + 1).next_multiple_of(16);
        let mut out = Vec::new();
        out.extend_from_slice(&1i32.to_ne_bytes());
        out.extend_from_slice(&mask.to_ne_bytes());
        out.extend_from_slice(&0u32.to_ne_bytes());
        out.extend_from_slice(&(padded as u32).to_ne_bytes());
        out.extend_from_slice(name.as_bytes());
        out.resize(out.len() + padded - name.len(), 0);
        out
    }

    #[test]
    fn test_parse_inotify_records() {
        let mut buf = record(libc::IN_CREATE, "event4");
        buf.extend(record(libc::IN_ATTRIB, "event5"));
        buf.extend(record(libc::IN_DELETE, "event2"));
        buf.extend(record(libc::IN_CREATE, "js0"));

        assert_eq!(
            parse_inotify_events(&buf),
            vec![
                NodeChange::Added("event4".to_string()),
                NodeChange::Added("event5".to_string()),
                NodeChange::Removed("event2".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_directory_degrades_to_no_watch() {
        assert!(DeviceWatch::new(Path::new("/nonexistent/nebula-input")).is_err());
    }
}
