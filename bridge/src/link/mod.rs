//! 板载串口链路
//!
//! 包含:
//! - 串口打开（1 Mbps, 8N1）或任意 `Read`/`Write` 注入
//! - 地址发现与事件通知启用
//! - 专用读线程：组帧、响应匹配、棋子/按键通知分发
//! - 同步请求 `send_command`（一次只允许一个请求等待响应）
//! - [`BoardControl`] 实现（LED 方格在此处转换为线上索引）
//!
//! LED 与声音命令没有响应，发出即返回，棋盘掉线时它们不会超时；
//! 掉线由有响应的命令（电量、快照）发现，协调器为此定期查询电量。

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use centaur_protocol::command::{
    self, CommandSpec, DGT_BUS_SEND_CHANGES, DGT_BUS_SEND_STATE, DGT_NOTIFY_EVENTS,
    DGT_RETURN_BUSADRES, DGT_SEND_BATTERY_INFO, DGT_SEND_TRADEMARK, DGT_SLEEP, KEY_NOTIFICATION,
    LED_OFF_CMD, LED_PATTERN, PIECE_NOTIFICATION,
};
use centaur_protocol::event::{parse_key_event, parse_piece_events};
use centaur_protocol::{
    rotate_field, BatteryStatus, BoardControl, Decoded, FrameDecoder, FrameTable, KeyEvent,
    Occupancy, Packet, PieceEvent, PieceEventKind, ProtocolError, SharedOccupancy, Sound,
    COMMAND_TIMEOUT, DISCOVERY_ATTEMPTS, FRAMING_ERROR_LIMIT, FRAMING_ERROR_WINDOW,
    SERIAL_BAUD_RATE, SERIAL_READ_TIMEOUT,
};
use tracing::{debug, error, info, warn};

use crate::error::Result;

#[cfg(test)]
pub(crate) mod fake;

/// 棋子事件回调（在读线程上调用）
pub type PieceSink = Arc<dyn Fn(PieceEvent) + Send + Sync>;

/// 按键事件回调（在读线程上调用）
pub type KeySink = Arc<dyn Fn(KeyEvent) + Send + Sync>;

/// 变化列表响应类型
const CHANGE_LIST: u8 = 0x85;

/// 按键轮询响应类型（也可能不请自来）
const KEY_POLL_RESPONSE: u8 = 0xb1;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 正在等待的请求
struct Pending {
    response: u8,
    expect: Option<(u8, u8)>,
    reply: mpsc::Sender<centaur_protocol::Result<Packet>>,
}

struct LinkInner {
    writer: Mutex<Box<dyn Write + Send>>,
    address: Mutex<Option<(u8, u8)>>,
    pending: Mutex<Option<Pending>>,
    request_lock: Mutex<()>,
    piece_sink: Mutex<Option<PieceSink>>,
    key_sink: Mutex<Option<KeySink>>,
    occupancy: SharedOccupancy,
    running: AtomicBool,
    discovering: AtomicBool,
}

impl LinkInner {
    fn address(&self) -> Option<(u8, u8)> {
        *lock(&self.address)
    }

    fn write_frame(&self, frame: &[u8]) -> centaur_protocol::Result<()> {
        let mut writer = lock(&self.writer);
        writer.write_all(frame)?;
        writer.flush()?;
        Ok(())
    }

    /// 不等待响应地发送（读线程内使用）
    fn send_raw(&self, spec: CommandSpec, address: (u8, u8)) {
        let payload = spec.default_payload.unwrap_or(&[]);
        let frame = Packet::new(spec.opcode, address.0, address.1, payload.to_vec())
            .encode(spec.form(payload));
        match frame {
            Ok(frame) => {
                if let Err(e) = self.write_frame(&frame) {
                    warn!("发送 {} 失败: {}", spec.name, e);
                }
            }
            Err(e) => warn!("{} 编码失败: {}", spec.name, e),
        }
    }

    fn request(
        &self,
        spec: CommandSpec,
        address: (u8, u8),
        expect: Option<(u8, u8)>,
        payload: &[u8],
        timeout: Duration,
    ) -> centaur_protocol::Result<Packet> {
        if !self.running.load(Ordering::Acquire) {
            return Err(ProtocolError::Cancelled);
        }
        let frame = Packet::new(spec.opcode, address.0, address.1, payload.to_vec())
            .encode(spec.form(payload))?;

        let _guard = lock(&self.request_lock);
        let Some(response) = spec.response else {
            debug!("-> {} {:02x?}", spec.name, payload);
            self.write_frame(&frame)?;
            return Ok(Packet::new(spec.opcode, address.0, address.1, Vec::new()));
        };

        let (tx, rx) = mpsc::channel();
        *lock(&self.pending) = Some(Pending {
            response,
            expect,
            reply: tx,
        });
        debug!("-> {} {:02x?} (等待 0x{:02x})", spec.name, payload, response);
        if let Err(e) = self.write_frame(&frame) {
            lock(&self.pending).take();
            return Err(e);
        }

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                lock(&self.pending).take();
                warn!("{} 等待响应超时", spec.name);
                Err(ProtocolError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(ProtocolError::Cancelled),
        }
    }

    /// 地址发现：先以 00 00 询问，再用得到的地址校验
    fn discover(&self) -> centaur_protocol::Result<(u8, u8)> {
        *lock(&self.address) = None;
        for attempt in 1..=DISCOVERY_ATTEMPTS {
            if !self.running.load(Ordering::Acquire) {
                return Err(ProtocolError::Cancelled);
            }
            let addr = match self.request(DGT_RETURN_BUSADRES, (0, 0), None, &[], COMMAND_TIMEOUT) {
                Ok(packet) => packet.address(),
                Err(e) => {
                    warn!("地址发现第 {} 次失败: {}", attempt, e);
                    continue;
                }
            };
            match self.request(DGT_RETURN_BUSADRES, addr, Some(addr), &[], COMMAND_TIMEOUT) {
                Ok(_) => {
                    *lock(&self.address) = Some(addr);
                    info!("棋盘地址: {:02x} {:02x}", addr.0, addr.1);
                    self.send_raw(DGT_NOTIFY_EVENTS, addr);
                    return Ok(addr);
                }
                Err(e) => warn!("地址校验第 {} 次失败: {}", attempt, e),
            }
        }
        error!("地址发现失败");
        Err(ProtocolError::NotReady)
    }

    fn cancel_pending(&self) {
        if let Some(pending) = lock(&self.pending).take() {
            let _ = pending.reply.send(Err(ProtocolError::Cancelled));
        }
    }

    /// 尝试用数据包完成等待中的请求
    fn resolve(&self, packet: &Packet) -> bool {
        let mut slot = lock(&self.pending);
        let matches = slot
            .as_ref()
            .map(|p| p.response == packet.kind)
            .unwrap_or(false);
        if !matches {
            return false;
        }
        let Some(pending) = slot.take() else {
            return false;
        };
        let result = match pending.expect {
            Some(expected) if expected != packet.address() => {
                Err(ProtocolError::AddressMismatch {
                    expected,
                    actual: packet.address(),
                })
            }
            _ => Ok(packet.clone()),
        };
        let _ = pending.reply.send(result);
        true
    }

    fn dispatch(&self, packet: Packet) {
        debug!("<- 0x{:02x} {:02x?}", packet.kind, packet.payload);
        if packet.kind == PIECE_NOTIFICATION {
            if let Some(addr) = self.address() {
                self.send_raw(DGT_BUS_SEND_CHANGES, addr);
            }
            return;
        }

        if !self.resolve(&packet) {
            match packet.kind {
                CHANGE_LIST => self.deliver_pieces(&packet.payload),
                KEY_NOTIFICATION | KEY_POLL_RESPONSE => {
                    if let Some(event) = parse_key_event(&packet.payload) {
                        let sink = lock(&self.key_sink).clone();
                        if let Some(sink) = sink {
                            sink(event);
                        }
                    }
                }
                other => debug!("未处理的包类型 0x{:02x}", other),
            }
        }

        if let Some(addr) = self.address() {
            self.send_raw(DGT_NOTIFY_EVENTS, addr);
        }
    }

    fn deliver_pieces(&self, payload: &[u8]) {
        let events = parse_piece_events(payload);
        if events.is_empty() {
            return;
        }
        let sink = lock(&self.piece_sink).clone();
        for event in events {
            let mut occ = self.occupancy.load();
            match event.kind {
                PieceEventKind::Lift => occ.clear(event.square),
                PieceEventKind::Place => occ.set(event.square),
            }
            self.occupancy.store(occ);
            debug!("棋子事件: {}", event);
            if let Some(sink) = &sink {
                sink(event);
            }
        }
    }
}

/// 连续帧错误计数窗口
struct ErrorWindow {
    times: VecDeque<Instant>,
}

impl ErrorWindow {
    fn new() -> Self {
        Self {
            times: VecDeque::with_capacity(FRAMING_ERROR_LIMIT),
        }
    }

    /// 记录一次错误；超过阈值时返回 true 并清空
    fn record(&mut self, now: Instant) -> bool {
        self.times.push_back(now);
        while let Some(&front) = self.times.front() {
            if now.duration_since(front) > FRAMING_ERROR_WINDOW {
                self.times.pop_front();
            } else {
                break;
            }
        }
        if self.times.len() >= FRAMING_ERROR_LIMIT {
            self.times.clear();
            return true;
        }
        false
    }
}

fn reader_loop(inner: Arc<LinkInner>, mut reader: Box<dyn Read + Send>) {
    let mut decoder = FrameDecoder::new(FrameTable::board_responses());
    let mut errors = ErrorWindow::new();
    let mut byte = [0u8; 1];

    while inner.running.load(Ordering::Acquire) {
        match reader.read(&mut byte) {
            Ok(0) => {
                info!("串口已关闭");
                break;
            }
            Ok(_) => {
                let mut decoded = decoder.feed(byte[0]);
                loop {
                    match decoded {
                        Decoded::Partial => break,
                        Decoded::Packet(packet) => {
                            inner.dispatch(packet);
                            decoded = decoder.poll();
                        }
                        Decoded::Resync(e) => {
                            debug!("帧错误，丢弃一个字节: {}", e);
                            if errors.record(Instant::now()) {
                                warn!("帧错误过多，重置链路");
                                decoder.clear();
                                rediscover(&inner);
                                break;
                            }
                            decoded = decoder.poll();
                        }
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                error!("串口断开: {}", e);
                break;
            }
            Err(e) => {
                warn!("串口读取错误: {}", e);
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    inner.running.store(false, Ordering::Release);
    inner.cancel_pending();
    debug!("读线程退出");
}

/// 在独立线程上重新发现地址（读线程不能等待自己的响应）
fn rediscover(inner: &Arc<LinkInner>) {
    if inner
        .discovering
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }
    *lock(&inner.address) = None;
    let inner = inner.clone();
    let spawned = thread::Builder::new()
        .name("board-rediscover".into())
        .spawn(move || {
            if let Err(e) = inner.discover() {
                error!("链路重置失败: {}", e);
            }
            inner.discovering.store(false, Ordering::Release);
        });
    if let Err(e) = spawned {
        error!("无法启动重新发现线程: {}", e);
    }
}

/// 解析商标响应：前两行之后的 `key: value`
pub fn parse_trademark(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .skip(2)
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// 棋盘链路
pub struct BoardLink {
    inner: Arc<LinkInner>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl BoardLink {
    /// 打开串口设备
    pub fn open(device: &str) -> Result<Self> {
        let port = serialport::new(device, SERIAL_BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(SERIAL_READ_TIMEOUT)
            .open()?;
        let reader = port.try_clone()?;
        info!("已打开串口 {} @ {} baud", device, SERIAL_BAUD_RATE);
        Ok(Self::from_io(Box::new(reader), Box::new(port))?)
    }

    /// 使用任意字节流（测试与回放）
    pub fn from_io(
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
    ) -> io::Result<Self> {
        let inner = Arc::new(LinkInner {
            writer: Mutex::new(writer),
            address: Mutex::new(None),
            pending: Mutex::new(None),
            request_lock: Mutex::new(()),
            piece_sink: Mutex::new(None),
            key_sink: Mutex::new(None),
            occupancy: SharedOccupancy::default(),
            running: AtomicBool::new(true),
            discovering: AtomicBool::new(false),
        });
        let thread_inner = inner.clone();
        let handle = thread::Builder::new()
            .name("board-reader".into())
            .spawn(move || reader_loop(thread_inner, reader))?;
        Ok(Self {
            inner,
            reader: Mutex::new(Some(handle)),
        })
    }

    /// 地址发现并读取初始占位
    pub fn start(&self) -> Result<Occupancy> {
        self.inner.discover()?;
        Ok(self.snapshot()?)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.address().is_some()
    }

    pub fn address(&self) -> Option<(u8, u8)> {
        self.inner.address()
    }

    /// 按符号名发送命令；`payload` 为 `None` 时使用默认负载
    pub fn send_command(
        &self,
        name: &str,
        payload: Option<&[u8]>,
        timeout: Duration,
    ) -> centaur_protocol::Result<Vec<u8>> {
        let spec = command::lookup(name)
            .copied()
            .ok_or_else(|| ProtocolError::UnknownCommand(name.to_string()))?;
        self.send_spec(spec, payload, timeout)
    }

    fn send_spec(
        &self,
        spec: CommandSpec,
        payload: Option<&[u8]>,
        timeout: Duration,
    ) -> centaur_protocol::Result<Vec<u8>> {
        let address = self.inner.address().ok_or(ProtocolError::NotReady)?;
        let payload = payload.or(spec.default_payload).unwrap_or(&[]);
        self.inner
            .request(spec, address, Some(address), payload, timeout)
            .map(|packet| packet.payload)
    }

    /// 安装棋子事件回调（替换已有回调）
    pub fn subscribe_piece_events(&self, sink: PieceSink) {
        *lock(&self.inner.piece_sink) = Some(sink);
    }

    /// 安装按键事件回调（替换已有回调）
    pub fn subscribe_button_events(&self, sink: KeySink) {
        *lock(&self.inner.key_sink) = Some(sink);
    }

    /// 读取整盘占位快照
    pub fn snapshot(&self) -> centaur_protocol::Result<Occupancy> {
        let dump = self.send_spec(DGT_BUS_SEND_STATE, None, COMMAND_TIMEOUT)?;
        if dump.len() < 64 {
            return Err(ProtocolError::InvalidResponse(format!(
                "board state has {} bytes",
                dump.len()
            )));
        }
        let occ = Occupancy::from_wire_dump(&dump);
        self.inner.occupancy.store(occ);
        Ok(occ)
    }

    pub fn trademark(&self) -> centaur_protocol::Result<BTreeMap<String, String>> {
        let payload = self.send_spec(DGT_SEND_TRADEMARK, None, COMMAND_TIMEOUT)?;
        Ok(parse_trademark(&String::from_utf8_lossy(&payload)))
    }

    /// 棋盘休眠
    pub fn sleep(&self) -> centaur_protocol::Result<()> {
        self.send_spec(DGT_SLEEP, None, COMMAND_TIMEOUT).map(|_| ())
    }

    /// 停止读线程；等待中的请求以 `Cancelled` 结束
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("关闭棋盘链路");
        self.inner.cancel_pending();
        if let Some(handle) = lock(&self.reader).take() {
            if handle.join().is_err() {
                error!("读线程异常退出");
            }
        }
    }
}

impl Drop for BoardLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl BoardControl for BoardLink {
    fn leds_off(&self) -> centaur_protocol::Result<()> {
        self.send_spec(LED_OFF_CMD, None, COMMAND_TIMEOUT).map(|_| ())
    }

    fn led_array(&self, squares: &[u8], speed: u8, intensity: u8) -> centaur_protocol::Result<()> {
        let mut payload = vec![0x05, speed, 0x00, intensity];
        payload.extend(squares.iter().map(|&sq| rotate_field(sq)));
        self.send_spec(LED_PATTERN, Some(&payload), COMMAND_TIMEOUT)
            .map(|_| ())
    }

    fn led_from_to(&self, from: u8, to: u8, intensity: u8) -> centaur_protocol::Result<()> {
        let payload = [0x05, 0x03, 0x00, intensity, rotate_field(from), rotate_field(to)];
        self.send_spec(LED_PATTERN, Some(&payload), COMMAND_TIMEOUT)
            .map(|_| ())
    }

    fn led(&self, square: u8, intensity: u8) -> centaur_protocol::Result<()> {
        let payload = [0x05, 0x0a, 0x01, intensity, rotate_field(square)];
        self.send_spec(LED_PATTERN, Some(&payload), COMMAND_TIMEOUT)
            .map(|_| ())
    }

    fn beep(&self, sound: Sound) -> centaur_protocol::Result<()> {
        self.send_spec(sound.command(), None, COMMAND_TIMEOUT)
            .map(|_| ())
    }

    fn battery(&self) -> centaur_protocol::Result<BatteryStatus> {
        let payload = self.send_spec(DGT_SEND_BATTERY_INFO, None, COMMAND_TIMEOUT)?;
        payload
            .first()
            .map(|&b| BatteryStatus::from_byte(b))
            .ok_or_else(|| ProtocolError::InvalidResponse("empty battery response".into()))
    }

    fn occupancy(&self) -> Occupancy {
        self.inner.occupancy.load()
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{fake_board, BOARD_ADDRESS};
    use super::*;
    use centaur_protocol::square::parse_square;
    use centaur_protocol::Key;

    const WAIT: Duration = Duration::from_secs(2);

    fn started() -> (BoardLink, fake::FakeBoard) {
        let (board, reader, writer) = fake_board(Occupancy::STARTING);
        let link = BoardLink::from_io(Box::new(reader), Box::new(writer)).unwrap();
        let occ = link.start().unwrap();
        assert_eq!(occ, Occupancy::STARTING);
        (link, board)
    }

    #[test]
    fn test_discovery_and_snapshot() {
        let (link, board) = started();
        assert!(link.is_ready());
        assert_eq!(link.address(), Some(BOARD_ADDRESS));
        assert_eq!(link.occupancy(), Occupancy::STARTING);
        assert!(board.wait_for(|p| p.kind == DGT_NOTIFY_EVENTS.opcode, WAIT));
        // 两次 0x46: 00 00 询问 + 地址校验
        let discovery: Vec<_> = board
            .received()
            .into_iter()
            .filter(|p| p.kind == DGT_RETURN_BUSADRES.opcode)
            .map(|p| p.address())
            .collect();
        assert_eq!(discovery, vec![(0, 0), BOARD_ADDRESS]);
    }

    #[test]
    fn test_not_ready_before_discovery() {
        let (_board, reader, writer) = fake_board(Occupancy::STARTING);
        let link = BoardLink::from_io(Box::new(reader), Box::new(writer)).unwrap();
        assert!(matches!(
            link.send_command("DGT_SEND_BATTERY_INFO", None, WAIT),
            Err(ProtocolError::NotReady)
        ));
        assert!(matches!(
            link.send_command("NO_SUCH_COMMAND", None, WAIT),
            Err(ProtocolError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_piece_notification_delivers_events() {
        let (link, board) = started();
        let (tx, rx) = mpsc::channel();
        link.subscribe_piece_events(Arc::new(move |e| {
            let _ = tx.send(e);
        }));

        // 拿起线上 52（e2），放下线上 36（e4）
        board.push_changes(vec![0x00, 0x07, 0x00, 0x40, 52, 0x41, 36]);
        let first = rx.recv_timeout(WAIT).unwrap();
        let second = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(first.kind, PieceEventKind::Lift);
        assert_eq!(first.square, parse_square("e2").unwrap());
        assert_eq!(second.kind, PieceEventKind::Place);
        assert_eq!(second.square, parse_square("e4").unwrap());
        assert_eq!(
            link.occupancy(),
            Occupancy::STARTING.without(12).with(28)
        );
        assert!(board.wait_for(|p| p.kind == DGT_BUS_SEND_CHANGES.opcode, WAIT));
    }

    #[test]
    fn test_key_notification() {
        let (link, board) = started();
        let (tx, rx) = mpsc::channel();
        link.subscribe_button_events(Arc::new(move |e| {
            let _ = tx.send(e);
        }));
        board.send_key(vec![0x00, 0x14, 0x0a, 0x05, 0x10, 0x00]);
        let event = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(event.key, Key::Tick);
        assert!(event.pressed);
    }

    #[test]
    fn test_battery_and_trademark() {
        let (link, board) = started();
        board.set_battery(0b0011_0100);
        let status = link.battery().unwrap();
        assert_eq!(status.level, 20);
        assert!(status.charging);

        let info = link.trademark().unwrap();
        assert_eq!(info.get("Version").map(String::as_str), Some("1.00"));
    }

    #[test]
    fn test_timeout_when_board_silent() {
        let (link, board) = started();
        board.set_mute(true);
        let result = link.send_command("DGT_SEND_BATTERY_INFO", None, Duration::from_millis(100));
        assert!(matches!(result, Err(ProtocolError::Timeout)));

        board.set_mute(false);
        assert!(link.battery().is_ok());
    }

    #[test]
    fn test_led_payloads_use_wire_indices() {
        let (link, board) = started();
        link.led_from_to(12, 28, 5).unwrap();
        link.led(0, 3).unwrap();
        link.led_array(&[63], 4, 2).unwrap();
        link.beep(Sound::WrongMove).unwrap();

        assert!(board.wait_for(|p| p.kind == 0xb1, WAIT));
        let leds: Vec<Vec<u8>> = board
            .received()
            .into_iter()
            .filter(|p| p.kind == 0xb0)
            .map(|p| p.payload)
            .collect();
        assert_eq!(
            leds,
            vec![
                vec![0x05, 0x03, 0x00, 5, 52, 36],
                vec![0x05, 0x0a, 0x01, 3, 56],
                vec![0x05, 4, 0x00, 2, 7],
            ]
        );
    }

    #[test]
    fn test_shutdown_cancels_in_flight_request() {
        let (link, board) = started();
        board.set_mute(true);
        let link = Arc::new(link);
        let worker = {
            let link = link.clone();
            thread::spawn(move || link.send_command("DGT_SEND_BATTERY_INFO", None, Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(100));
        link.shutdown();
        let result = worker.join().unwrap();
        assert!(matches!(result, Err(ProtocolError::Cancelled)));
    }

    #[test]
    fn test_framing_errors_trigger_rediscovery() {
        let (link, board) = started();
        board.inject(vec![0x00; FRAMING_ERROR_LIMIT + 4]);

        let deadline = Instant::now() + Duration::from_secs(5);
        let count = || {
            board
                .received()
                .iter()
                .filter(|p| p.kind == DGT_RETURN_BUSADRES.opcode)
                .count()
        };
        while count() < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(count() >= 4);
        while !link.is_ready() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(link.is_ready());
    }

    #[test]
    fn test_parse_trademark() {
        let text = "Digital Game Technology\r\nCopyright (c) 2021 DGT\r\nsoftware version: 1.00, build: 210722\r\nhardware version: 1.00\r\nserial no: 5000000000";
        let info = parse_trademark(text);
        assert_eq!(
            info.get("software version").map(String::as_str),
            Some("1.00, build: 210722")
        );
        assert_eq!(info.get("serial no").map(String::as_str), Some("5000000000"));
        assert_eq!(info.len(), 3);
    }

    #[test]
    fn test_error_window() {
        let mut window = ErrorWindow::new();
        let start = Instant::now();
        for i in 0..FRAMING_ERROR_LIMIT - 1 {
            assert!(!window.record(start + Duration::from_millis(i as u64)));
        }
        assert!(window.record(start + Duration::from_millis(100)));
        // 窗口外的旧错误不计入
        let later = start + FRAMING_ERROR_WINDOW * 3;
        assert!(!window.record(later));
    }
}
