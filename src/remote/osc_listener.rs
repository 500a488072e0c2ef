use std::io;
use std::net::UdpSocket;
use std::thread;
use std::time::Duration;

use rosc::{decoder, OscMessage, OscPacket, OscType};

use crate::config::OscConfig;
use crate::general::cancel::CancelToken;
use crate::general::transpose::ShiftControl;

// Read timeout so the thread notices cancellation
const RECV_TIMEOUT: Duration = Duration::from_millis(200);

/// Interpret a numeric OSC argument as a whole number of semitones.
fn numeric_arg(arg: &OscType) -> Option<i32> {
    match *arg {
        OscType::Int(v) => Some(v),
        OscType::Long(v) => i32::try_from(v).ok(),
        OscType::Float(v) => Some(v.round() as i32),
        OscType::Double(v) => Some(v.round() as i32),
        _ => None,
    }
}

/// Button-style argument: `1`, `1.0` or `true` means pressed.
fn pressed_arg(arg: &OscType) -> bool {
    match *arg {
        OscType::Int(v) => v == 1,
        OscType::Long(v) => v == 1,
        OscType::Float(v) => (v - 1.0).abs() < f32::EPSILON,
        OscType::Double(v) => (v - 1.0).abs() < f64::EPSILON,
        OscType::Bool(b) => b,
        _ => false,
    }
}

/// Applies OSC control messages to the shift.
pub struct OscControl {
    config: OscConfig,
    shift: ShiftControl,
}

impl OscControl {
    pub fn new(config: OscConfig, shift: ShiftControl) -> Self {
        Self { config, shift }
    }

    pub fn handle_packet(&self, packet: OscPacket) {
        match packet {
            OscPacket::Message(msg) => self.handle_message(&msg),
            OscPacket::Bundle(bundle) => {
                for pkt in bundle.content {
                    self.handle_packet(pkt);
                }
            }
        }
    }

    fn handle_message(&self, msg: &OscMessage) {
        let Some(arg) = msg.args.first() else {
            log::warn!("[OSC] {} without argument ignored", msg.addr);
            return;
        };

        if msg.addr == self.config.transpose_path {
            match numeric_arg(arg) {
                Some(v) => {
                    let clamped = self.shift.set(v);
                    log::info!("[OSC] Shift set to {}", clamped);
                }
                None => log::warn!("[OSC] {} requires a numeric argument (got {:?})", msg.addr, arg),
            }
        } else if msg.addr == self.config.transpose_up_path {
            if pressed_arg(arg) {
                let (old, new) = self.shift.nudge(1);
                log::info!("[OSC] Shift up: {} -> {}", old, new);
            }
        } else if msg.addr == self.config.transpose_down_path {
            if pressed_arg(arg) {
                let (old, new) = self.shift.nudge(-1);
                log::info!("[OSC] Shift down: {} -> {}", old, new);
            }
        } else {
            log::debug!("[OSC] Ignoring {}", msg.addr);
        }
    }
}

/// Bind the configured address and spawn a thread applying OSC control
/// messages until `cancel` is set. Binding errors are returned to the caller.
pub fn spawn_osc_listener(
    config: OscConfig,
    shift: ShiftControl,
    cancel: CancelToken,
) -> io::Result<thread::JoinHandle<()>> {
    let bind_addr = format!("{}:{}", config.listening_host, config.listening_port);
    let socket = UdpSocket::bind(&bind_addr)?;
    socket.set_read_timeout(Some(RECV_TIMEOUT))?;
    log::info!(
        "OSC listener bound on {} (paths: {}, {}, {})",
        bind_addr,
        config.transpose_path,
        config.transpose_up_path,
        config.transpose_down_path
    );

    let control = OscControl::new(config, shift);
    Ok(thread::spawn(move || {
        let mut buf = [0u8; decoder::MTU];
        while !cancel.is_cancelled() {
            match socket.recv_from(&mut buf) {
                Ok((size, peer_addr)) => match decoder::decode_udp(&buf[..size]) {
                    Ok((_, packet)) => control.handle_packet(packet),
                    Err(err) => log::warn!("[OSC] Decode error from {}: {}", peer_addr, err),
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                    continue;
                }
                Err(err) => {
                    log::error!("[OSC] Receive error: {}", err);
                    break;
                }
            }
        }
        log::debug!("OSC listener exiting");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosc::encoder;

    fn control() -> (OscControl, ShiftControl) {
        let shift = ShiftControl::new(0, -12, 12);
        (OscControl::new(OscConfig::default(), shift.clone()), shift)
    }

    fn message(addr: &str, arg: OscType) -> OscPacket {
        OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args: vec![arg],
        })
    }

    #[test]
    fn test_set_and_nudge() {
        let (control, shift) = control();
        control.handle_packet(message("/transpose", OscType::Float(3.4)));
        assert_eq!(shift.get(), 3);
        control.handle_packet(message("/transposeUp", OscType::Int(1)));
        assert_eq!(shift.get(), 4);
        control.handle_packet(message("/transposeDown", OscType::Bool(true)));
        control.handle_packet(message("/transposeDown", OscType::Int(0)));
        assert_eq!(shift.get(), 3);
        control.handle_packet(message("/transpose", OscType::Int(99)));
        assert_eq!(shift.get(), 12);
    }

    #[test]
    fn test_non_numeric_and_unknown_are_ignored() {
        let (control, shift) = control();
        control.handle_packet(message("/transpose", OscType::String("five".to_string())));
        control.handle_packet(message("/volume", OscType::Int(5)));
        assert_eq!(shift.get(), 0);
    }

    #[test]
    fn test_listener_applies_udp_packets() {
        let shift = ShiftControl::new(0, -12, 12);
        let cancel = CancelToken::new();
        // Find a free port to send to
        let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);
        let config = OscConfig {
            listening_host: "127.0.0.1".to_string(),
            listening_port: port,
            ..OscConfig::default()
        };
        let handle = spawn_osc_listener(config, shift.clone(), cancel.clone()).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let packet = encoder::encode(&message("/transpose", OscType::Int(-5))).unwrap();
        sender.send_to(&packet, ("127.0.0.1", port)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while shift.get() != -5 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        cancel.cancel();
        handle.join().unwrap();
        assert_eq!(shift.get(), -5);
    }
}
