//! 脚本化的内存棋盘，供链路测试使用

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use centaur_protocol::packet::encode_long;
use centaur_protocol::{Decoded, FrameDecoder, FrameForm, FrameTable, Occupancy, Packet};

pub(crate) const BOARD_ADDRESS: (u8, u8) = (0x06, 0x50);

const TRADEMARK: &str = "DGT Centaur\nCopyright (c) DGT\nVersion: 1.00\nSerial: 0001";

/// 主机发往棋盘的帧形式：带负载为长帧
fn host_table() -> FrameTable {
    let short = FrameForm::Short { payload_len: 0 };
    [0x82, 0x83, 0x94, 0x98, 0x58, 0x46, 0x55, 0x4d, 0x97]
        .into_iter()
        .fold(FrameTable::empty(), |t, kind| t.with(kind, short))
        .with(0xb0, FrameForm::Long)
        .with(0xb1, FrameForm::Long)
        .with(0xb2, FrameForm::Long)
}

#[derive(Default)]
struct FakeState {
    occupancy: Occupancy,
    changes: VecDeque<Vec<u8>>,
    received: Vec<Packet>,
    battery: u8,
    mute: bool,
}

/// 测试端句柄
pub(crate) struct FakeBoard {
    state: Arc<Mutex<FakeState>>,
    to_host: Sender<u8>,
}

/// 主机侧读端
pub(crate) struct HostReader {
    rx: Receiver<u8>,
}

impl Read for HostReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.rx.recv_timeout(Duration::from_millis(50)) {
            Ok(byte) => {
                buf[0] = byte;
                Ok(1)
            }
            Err(RecvTimeoutError::Timeout) => Err(io::Error::new(io::ErrorKind::TimedOut, "idle")),
            Err(RecvTimeoutError::Disconnected) => Ok(0),
        }
    }
}

/// 主机侧写端
pub(crate) struct HostWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for HostWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "board gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn fake_board(occupancy: Occupancy) -> (FakeBoard, HostReader, HostWriter) {
    let (to_host, host_rx) = mpsc::channel();
    let (host_tx, from_host) = mpsc::channel::<Vec<u8>>();
    let state = Arc::new(Mutex::new(FakeState {
        occupancy,
        battery: 0x0a,
        ..FakeState::default()
    }));

    let responder_state = state.clone();
    let responder_tx = to_host.clone();
    thread::spawn(move || {
        let mut decoder = FrameDecoder::new(host_table());
        for chunk in from_host {
            for byte in chunk {
                let mut decoded = decoder.feed(byte);
                while decoded != Decoded::Partial {
                    if let Decoded::Packet(packet) = &decoded {
                        respond(&responder_state, &responder_tx, packet.clone());
                    }
                    decoded = decoder.poll();
                }
            }
        }
    });

    (
        FakeBoard { state, to_host },
        HostReader { rx: host_rx },
        HostWriter { tx: host_tx },
    )
}

fn send_frame(tx: &Sender<u8>, kind: u8, payload: &[u8]) {
    if let Ok(frame) = encode_long(kind, BOARD_ADDRESS.0, BOARD_ADDRESS.1, payload) {
        for b in frame {
            let _ = tx.send(b);
        }
    }
}

fn respond(state: &Arc<Mutex<FakeState>>, tx: &Sender<u8>, packet: Packet) {
    let mut s = state.lock().unwrap();
    s.received.push(packet.clone());
    if s.mute {
        return;
    }
    match packet.kind {
        0x46 => send_frame(tx, 0x90, &[]),
        0x82 => send_frame(tx, 0x83, &s.occupancy.to_wire_bytes()),
        0x83 => {
            let changes = s.changes.pop_front().unwrap_or_default();
            send_frame(tx, 0x85, &changes);
        }
        0x98 => send_frame(tx, 0xb5, &[s.battery]),
        0x97 => send_frame(tx, 0xb4, TRADEMARK.as_bytes()),
        0xb2 => send_frame(tx, 0xb1, &[]),
        _ => {}
    }
}

impl FakeBoard {
    /// 排入一个变化列表并发出棋子通知
    pub(crate) fn push_changes(&self, payload: Vec<u8>) {
        self.state.lock().unwrap().changes.push_back(payload);
        send_frame(&self.to_host, 0x8e, &[]);
    }

    pub(crate) fn send_key(&self, payload: Vec<u8>) {
        send_frame(&self.to_host, 0xa3, &payload);
    }

    /// 原样注入字节
    pub(crate) fn inject(&self, bytes: Vec<u8>) {
        for b in bytes {
            let _ = self.to_host.send(b);
        }
    }

    pub(crate) fn set_mute(&self, mute: bool) {
        self.state.lock().unwrap().mute = mute;
    }

    pub(crate) fn set_battery(&self, value: u8) {
        self.state.lock().unwrap().battery = value;
    }

    pub(crate) fn received(&self) -> Vec<Packet> {
        self.state.lock().unwrap().received.clone()
    }

    /// 等待收到满足条件的主机帧
    pub(crate) fn wait_for(&self, pred: impl Fn(&Packet) -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.received().iter().any(&pred) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }
}
