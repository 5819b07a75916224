//! Minimal text-mode AT driver over a serial port
//! 基于串口的最小文本模式AT驱动
//!
//! This is the production [`ModemDriver`] implementation: plain text-mode
//! AT commands (CMGF=1) with unsolicited +CMT delivery for inbound SMS.
//! PDU mode is not implemented, so multipart headers are not visible here
//! and inbound messages carry no concat info.
//! 这是生产环境的[`ModemDriver`]实现：纯文本模式AT命令（CMGF=1），入站
//! 短信通过+CMT主动上报。未实现PDU模式，因此这里看不到多段头，入站消息
//! 不携带串联信息。

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::gateway::error::{GatewayError, GatewayResult};

use super::{
    signal_strength_desc, IncomingSms, ModemDriver, ModemDriverFactory, ModemIdentity, ModemInfo,
    SmsHook,
};

/// Default modem baud rate / 默认调制解调器波特率
pub const DEFAULT_BAUD_RATE: u32 = 9600;

const COMMAND_DEADLINE: Duration = Duration::from_secs(5);
const SEND_DEADLINE: Duration = Duration::from_secs(30);
const URC_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Builds a [`SerialAtModem`] per device / 为每个设备构建[`SerialAtModem`]
pub struct SerialAtModemFactory {
    baud_rate: u32,
}

impl SerialAtModemFactory {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for SerialAtModemFactory {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

impl ModemDriverFactory for SerialAtModemFactory {
    fn build(&self, device: &str, hook: SmsHook) -> Arc<dyn ModemDriver> {
        Arc::new(SerialAtModem::new(device, self.baud_rate, hook))
    }
}

struct Session {
    port: Box<dyn serialport::SerialPort>,
    /// Residual bytes between reads / 两次读取之间的残留字节
    buf: Vec<u8>,
}

pub struct SerialAtModem {
    device: String,
    baud_rate: u32,
    hook: SmsHook,
    session: Arc<Mutex<Option<Session>>>,
    stopped: Arc<AtomicBool>,
}

impl SerialAtModem {
    pub fn new(device: impl Into<String>, baud_rate: u32, hook: SmsHook) -> Self {
        Self {
            device: device.into(),
            baud_rate,
            hook,
            session: Arc::new(Mutex::new(None)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    fn spawn_urc_poll(&self) {
        let session = Arc::clone(&self.session);
        let stopped = Arc::clone(&self.stopped);
        let hook = Arc::clone(&self.hook);
        let device = self.device.clone();
        tokio::task::spawn_blocking(move || {
            while !stopped.load(Ordering::Relaxed) {
                std::thread::sleep(URC_POLL_INTERVAL);
                let mut guard = session.lock();
                let Some(sess) = guard.as_mut() else { break };
                loop {
                    match read_line(sess, Duration::from_millis(50)) {
                        Ok(Some(line)) if line.starts_with("+CMT:") => {
                            // The message body is the next line. / 正文在下一行。
                            match read_line(sess, Duration::from_millis(500)) {
                                Ok(Some(body)) => match parse_cmt(&line, &body) {
                                    Some(sms) => hook(sms),
                                    None => warn!(device = %device, %line, "unparseable +CMT header"),
                                },
                                _ => warn!(device = %device, "missing +CMT body"),
                            }
                        }
                        Ok(Some(line)) => debug!(device = %device, %line, "unsolicited line"),
                        Ok(None) => break,
                        Err(e) => {
                            warn!(device = %device, error = %e, "urc poll read failed");
                            break;
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl ModemDriver for SerialAtModem {
    async fn connect(&self) -> GatewayResult<ModemIdentity> {
        let session = Arc::clone(&self.session);
        let device = self.device.clone();
        let baud_rate = self.baud_rate;

        let identity = tokio::task::spawn_blocking(move || -> GatewayResult<ModemIdentity> {
            let port = serialport::new(&device, baud_rate)
                .timeout(Duration::from_millis(200))
                .open()
                .map_err(|e| GatewayError::Modem(format!("open {device}: {e}")))?;
            let mut sess = Session {
                port,
                buf: Vec::new(),
            };

            command(&mut sess, "AT")?;
            command(&mut sess, "ATE0")?;
            // Text mode, inbound SMS pushed as +CMT. / 文本模式，入站短信以+CMT上报。
            command(&mut sess, "AT+CMGF=1")?;
            command(&mut sess, "AT+CNMI=2,2,0,0,0")?;

            let imsi = first_data_line(command(&mut sess, "AT+CIMI")?)
                .ok_or_else(|| GatewayError::Modem("no imsi reported".to_string()))?;
            let info = ModemInfo {
                imei: first_data_line(command(&mut sess, "AT+CGSN")?).unwrap_or_default(),
                manufacturer: first_data_line(command(&mut sess, "AT+CGMI")?).unwrap_or_default(),
                model: first_data_line(command(&mut sess, "AT+CGMM")?).unwrap_or_default(),
                revision: first_data_line(command(&mut sess, "AT+CGMR")?).unwrap_or_default(),
                network: command(&mut sess, "AT+COPS?")?
                    .iter()
                    .find_map(|l| l.split('"').nth(1).map(str::to_string))
                    .unwrap_or_default(),
                signal: match query_signal(&mut sess) {
                    Ok(n) => signal_strength_desc(n),
                    Err(_) => "unknown".to_string(),
                },
            };

            *session.lock() = Some(sess);
            Ok(ModemIdentity { imsi, info })
        })
        .await
        .map_err(|e| GatewayError::Modem(format!("connect task: {e}")))??;

        self.stopped.store(false, Ordering::Relaxed);
        self.spawn_urc_poll();
        Ok(identity)
    }

    async fn close(&self) -> GatewayResult<()> {
        self.stopped.store(true, Ordering::Relaxed);
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            // Dropping the port closes the device. / 丢弃端口即关闭设备。
            session.lock().take();
        })
        .await
        .map_err(|e| GatewayError::Modem(format!("close task: {e}")))?;
        Ok(())
    }

    async fn send_sms(&self, recipient: &str, text: &str) -> GatewayResult<()> {
        let session = Arc::clone(&self.session);
        let recipient = recipient.to_string();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || -> GatewayResult<()> {
            let mut guard = session.lock();
            let sess = guard
                .as_mut()
                .ok_or_else(|| GatewayError::Modem("not connected".to_string()))?;

            write_raw(sess, format!("AT+CMGS=\"{recipient}\"\r").as_bytes())?;
            wait_for_prompt(sess, COMMAND_DEADLINE)?;
            // Ctrl-Z terminates the message body. / Ctrl-Z结束短信正文。
            write_raw(sess, text.as_bytes())?;
            write_raw(sess, &[0x1a])?;
            read_until_final(sess, SEND_DEADLINE)?;
            Ok(())
        })
        .await
        .map_err(|e| GatewayError::Modem(format!("send task: {e}")))?
    }

    async fn wait_for_network_coverage(&self, timeout: Duration) -> GatewayResult<u32> {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || -> GatewayResult<u32> {
            let deadline = Instant::now() + timeout;
            loop {
                {
                    let mut guard = session.lock();
                    let sess = guard
                        .as_mut()
                        .ok_or_else(|| GatewayError::Modem("not connected".to_string()))?;
                    let registered = command(sess, "AT+CREG?")?
                        .iter()
                        .any(|l| l.contains(",1") || l.contains(",5"));
                    if registered {
                        let signal = query_signal(sess)?;
                        if signal > 0 && signal != 99 {
                            return Ok(signal);
                        }
                    }
                }
                if Instant::now() >= deadline {
                    return Err(GatewayError::Modem("no network coverage".to_string()));
                }
                std::thread::sleep(Duration::from_millis(500));
            }
        })
        .await
        .map_err(|e| GatewayError::Modem(format!("network task: {e}")))?
    }

    async fn drain_stored_sms(&self) -> GatewayResult<()> {
        let session = Arc::clone(&self.session);
        let hook = Arc::clone(&self.hook);
        tokio::task::spawn_blocking(move || -> GatewayResult<()> {
            let mut guard = session.lock();
            let sess = guard
                .as_mut()
                .ok_or_else(|| GatewayError::Modem("not connected".to_string()))?;
            let lines = command(sess, "AT+CMGL=\"REC UNREAD\"")?;
            let mut iter = lines.iter().peekable();
            while let Some(line) = iter.next() {
                if line.starts_with("+CMGL:") {
                    if let Some(body) = iter.next() {
                        if let Some(sms) = parse_cmt(line, body) {
                            hook(sms);
                        }
                    }
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| GatewayError::Modem(format!("drain task: {e}")))?
    }
}

// ~~~~~ blocking serial helpers / 阻塞串口辅助函数 ~~~~~

fn write_raw(sess: &mut Session, bytes: &[u8]) -> GatewayResult<()> {
    sess.port
        .write_all(bytes)
        .map_err(|e| GatewayError::Modem(format!("write: {e}")))?;
    sess.port
        .flush()
        .map_err(|e| GatewayError::Modem(format!("flush: {e}")))
}

fn command(sess: &mut Session, cmd: &str) -> GatewayResult<Vec<String>> {
    write_raw(sess, format!("{cmd}\r").as_bytes())?;
    read_until_final(sess, COMMAND_DEADLINE)
}

/// Collect response lines until the final OK / ERROR
/// 收集响应行直到最终的OK / ERROR
fn read_until_final(sess: &mut Session, deadline: Duration) -> GatewayResult<Vec<String>> {
    let until = Instant::now() + deadline;
    let mut lines = Vec::new();
    loop {
        let left = until.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(GatewayError::Modem("command timed out".to_string()));
        }
        match read_line(sess, left)? {
            Some(line) if line == "OK" => return Ok(lines),
            Some(line) if line == "ERROR" || line.starts_with("+CMS ERROR") => {
                return Err(GatewayError::Modem(format!("command failed: {line}")))
            }
            Some(line) => lines.push(line),
            None => return Err(GatewayError::Modem("command timed out".to_string())),
        }
    }
}

/// Wait for the `>` prompt of AT+CMGS / 等待AT+CMGS的`>`提示符
fn wait_for_prompt(sess: &mut Session, deadline: Duration) -> GatewayResult<()> {
    let until = Instant::now() + deadline;
    loop {
        if sess.buf.iter().any(|&b| b == b'>') {
            sess.buf.clear();
            return Ok(());
        }
        if Instant::now() >= until {
            return Err(GatewayError::Modem("no send prompt".to_string()));
        }
        fill_buf(sess)?;
    }
}

/// Read one non-empty trimmed line; `None` when the deadline elapses
/// 读取一个非空的已修剪行；超时返回`None`
fn read_line(sess: &mut Session, deadline: Duration) -> GatewayResult<Option<String>> {
    let until = Instant::now() + deadline;
    loop {
        if let Some(pos) = sess.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = sess.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if line.is_empty() {
                continue;
            }
            return Ok(Some(line));
        }
        if Instant::now() >= until {
            return Ok(None);
        }
        fill_buf(sess)?;
    }
}

fn fill_buf(sess: &mut Session) -> GatewayResult<()> {
    let mut chunk = [0u8; 256];
    match sess.port.read(&mut chunk) {
        Ok(0) => {}
        Ok(n) => sess.buf.extend_from_slice(&chunk[..n]),
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
        Err(e) => return Err(GatewayError::Modem(format!("read: {e}"))),
    }
    Ok(())
}

fn first_data_line(lines: Vec<String>) -> Option<String> {
    lines.into_iter().find(|l| !l.is_empty())
}

fn query_signal(sess: &mut Session) -> GatewayResult<u32> {
    let lines = command(sess, "AT+CSQ")?;
    lines
        .iter()
        .find_map(|l| {
            l.strip_prefix("+CSQ:")
                .and_then(|rest| rest.split(',').next())
                .and_then(|n| n.trim().parse::<u32>().ok())
        })
        .ok_or_else(|| GatewayError::Modem("no +CSQ response".to_string()))
}

/// Parse a `+CMT:`/`+CMGL:` header plus body line into an [`IncomingSms`]
/// 将`+CMT:`/`+CMGL:`头行加正文行解析为[`IncomingSms`]
fn parse_cmt(header: &str, body: &str) -> Option<IncomingSms> {
    // +CMT: "+393481111111",,"25/08/30,14:22:05+08"
    // +CMGL: 1,"REC UNREAD","+393481111111",,"25/08/30,14:22:05+08"
    let quoted: Vec<&str> = header.split('"').skip(1).step_by(2).collect();
    let sender = quoted
        .iter()
        .find(|s| s.starts_with('+') || s.chars().all(|c| c.is_ascii_digit()))?
        .to_string();
    let timestamp = quoted
        .iter()
        .find_map(|s| parse_cmt_timestamp(s))
        .unwrap_or_else(Utc::now);
    Some(IncomingSms {
        sender,
        text: body.to_string(),
        timestamp,
        concat: None,
    })
}

fn parse_cmt_timestamp(s: &str) -> Option<DateTime<Utc>> {
    // Zone offset (quarter-hours) is ignored. / 时区偏移（以刻钟计）被忽略。
    let naive = NaiveDateTime::parse_from_str(s.get(..17)?, "%y/%m/%d,%H:%M:%S").ok()?;
    Some(naive.and_utc())
}

#[cfg(test)]
mod at_test {
    use super::*;

    #[test]
    fn test_parse_cmt_header() {
        let sms = parse_cmt(
            r#"+CMT: "+393481111111",,"25/08/30,14:22:05+08""#,
            "hello there",
        )
        .expect("parseable header");
        assert_eq!(sms.sender, "+393481111111");
        assert_eq!(sms.text, "hello there");
        assert!(sms.concat.is_none());
        assert_eq!(
            sms.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2025-08-30 14:22:05"
        );
    }

    #[test]
    fn test_parse_cmgl_header() {
        let sms = parse_cmt(
            r#"+CMGL: 4,"REC UNREAD","+393482222222",,"25/01/02,03:04:05+08""#,
            "part",
        )
        .expect("parseable header");
        assert_eq!(sms.sender, "+393482222222");
    }

    #[test]
    fn test_parse_cmt_bad_header() {
        assert!(parse_cmt("+CMT: garbage", "body").is_none());
    }
}
