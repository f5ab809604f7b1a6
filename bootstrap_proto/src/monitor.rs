// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device side of the protocol: a blocking request/response loop.
//!
//! Each iteration waits for a start of frame, reads and checks one request,
//! dispatches it and sends exactly one ACK or NACK back before looking for
//! the next frame. Nothing is queued and nothing is retried; a host that
//! gets a NACK decides for itself whether to resend.

use crate::board::{Board, BoardError};
use crate::cmd::{regions, sjtag_response, Command, CommandError, Opcode, SJTAG_LEN};
use crate::frame::{self, Frame, PayloadMode};
use crate::transport::Transport;
use crate::Error;
use log::{debug, info, warn, LevelFilter};
use strum_macros::{Display, EnumString, IntoStaticStr};

/// Reasons carried in NACK payloads. The strings are part of the protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
pub enum NackReason {
    #[strum(to_string = "Garbled command")]
    Garbled,
    #[strum(to_string = "CRC failure")]
    Crc,
    #[strum(to_string = "Unknown command")]
    Unknown,
    #[strum(to_string = "Data misordering")]
    Misordering,
    #[strum(to_string = "Too much data")]
    TooMuchData,
    #[strum(to_string = "Incomplete download")]
    Incomplete,
    #[strum(to_string = "No image")]
    NoImage,
    #[strum(to_string = "Authentication failed")]
    AuthFailed,
    #[strum(to_string = "Invalid argument")]
    InvalidArgument,
    #[strum(to_string = "OTP program failed")]
    OtpProgram,
    #[strum(to_string = "OTP read failed")]
    OtpRead,
    #[strum(to_string = "No challenge")]
    NoChallenge,
    #[strum(to_string = "SJTAG unlock failed")]
    SjtagUnlock,
    #[strum(to_string = "Write failed")]
    WriteFailed,
    #[strum(to_string = "Bind failed")]
    BindFailed,
    #[strum(to_string = "Not supported")]
    NotSupported,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Largest request payload accepted in a single frame. Also caps the
    /// size of OTP reads, whose data comes back in one reply.
    pub max_payload: usize,
    /// Size of the download buffer.
    pub image_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            max_payload: 1024,
            image_capacity: 1 << 20,
        }
    }
}

/// Why the monitor loop ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Exit {
    /// Host asked to continue booting.
    Continue,
    /// Host asked for a reset; the board has been told.
    Reset,
}

#[derive(Debug)]
enum Reply {
    Ack(Vec<u8>),
    Nack(NackReason),
}

impl Reply {
    fn ack() -> Reply {
        Reply::Ack(Vec::new())
    }
}

fn board_nack(e: BoardError, failure: NackReason) -> NackReason {
    match e {
        BoardError::NotSupported => NackReason::NotSupported,
        BoardError::AuthFailed => NackReason::AuthFailed,
        BoardError::OutOfRange | BoardError::Failed => failure,
    }
}

fn status(result: Result<(), BoardError>, failure: NackReason) -> Reply {
    match result {
        Ok(()) => Reply::ack(),
        Err(e) => {
            warn!("board operation failed: {e}");
            Reply::Nack(board_nack(e, failure))
        }
    }
}

/// Maps firmware trace levels (0 none, 10 error, 20 notice, 30 warning,
/// 40 info, 50 verbose) onto log filters.
pub fn trace_filter(level: u32) -> LevelFilter {
    match level {
        0 => LevelFilter::Off,
        1..=10 => LevelFilter::Error,
        11..=30 => LevelFilter::Warn,
        31..=40 => LevelFilter::Info,
        41..=50 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub struct Monitor<'b, B: Board + ?Sized> {
    board: &'b mut B,
    config: MonitorConfig,
    image: Vec<u8>,
    /// Size announced by the last send request, 0 if none was given.
    announced: u32,
    challenge: Option<[u8; SJTAG_LEN]>,
}

impl<'b, B: Board + ?Sized> Monitor<'b, B> {
    pub fn new(board: &'b mut B, config: MonitorConfig) -> Self {
        Monitor {
            board,
            config,
            image: Vec::new(),
            announced: 0,
            challenge: None,
        }
    }

    /// The image downloaded so far.
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Serves requests until the host ends the session. Only transport
    /// failures come back as errors.
    pub fn run<T: Transport + ?Sized>(&mut self, port: &mut T) -> Result<Exit, Error> {
        info!("bootstrap monitor ready");
        loop {
            if let Some(exit) = self.serve_one(port)? {
                info!("monitor exiting: {exit:?}");
                return Ok(exit);
            }
        }
    }

    /// Receives one frame and answers it.
    pub fn serve_one<T: Transport + ?Sized>(&mut self, port: &mut T) -> Result<Option<Exit>, Error> {
        let rx = match frame::read_header(port) {
            Ok(rx) => rx,
            Err(Error::Comms(e)) => return Err(Error::Comms(e)),
            Err(e) => {
                warn!("dropping frame: {e}");
                self.reply(port, PayloadMode::Hex, Reply::Nack(NackReason::Garbled))?;
                return Ok(None);
            }
        };
        let header = rx.header;

        debug!(
            "request {:?} ({:?}) arg0={:#x} len={} {:?}",
            header.opcode as char,
            Opcode::from_byte(header.opcode),
            header.arg0,
            header.length,
            header.mode
        );

        // Refuse before buffering anything, but consume the rest of the frame
        // so a binary payload can't be mistaken for further requests.
        if header.length as usize > self.config.max_payload {
            warn!(
                "payload of {} bytes exceeds {} byte limit",
                header.length, self.config.max_payload
            );
            frame::skip_body(port, &header)?;
            self.reply(port, header.mode, Reply::Nack(NackReason::TooMuchData))?;
            return Ok(None);
        }

        let payload = match frame::read_body(port, &rx) {
            Ok(p) => p,
            Err(Error::Comms(e)) => return Err(Error::Comms(e)),
            Err(e) => {
                warn!("rejecting frame: {e}");
                let reason = match e {
                    Error::CrcFailure { .. } => NackReason::Crc,
                    _ => NackReason::Garbled,
                };
                self.reply(port, header.mode, Reply::Nack(reason))?;
                return Ok(None);
            }
        };

        let (reply, exit) = match Command::decode(header.opcode, header.arg0, &payload) {
            Ok(cmd) => self.dispatch(cmd),
            Err(CommandError::Unknown(op)) => {
                warn!("unknown command {op:#04x}");
                (Reply::Nack(NackReason::Unknown), None)
            }
            Err(CommandError::InvalidArgument) => {
                warn!("malformed arguments for {:?}", header.opcode as char);
                (Reply::Nack(NackReason::InvalidArgument), None)
            }
        };

        self.reply(port, header.mode, reply)?;

        if exit == Some(Exit::Reset) {
            self.board.reset();
        }

        Ok(exit)
    }

    fn reply<T: Transport + ?Sized>(
        &self,
        port: &mut T,
        mode: PayloadMode,
        reply: Reply,
    ) -> Result<(), Error> {
        let frame = match reply {
            Reply::Ack(data) => Frame::new(Opcode::Ack.as_byte(), 0, data, mode),
            Reply::Nack(reason) => {
                debug!("NACK: {reason}");
                let text: &'static str = reason.into();
                Frame::new(Opcode::Nack.as_byte(), 0, text.as_bytes(), mode)
            }
        };
        frame::write_frame(port, &frame)
    }

    fn dispatch(&mut self, cmd: Command<'_>) -> (Reply, Option<Exit>) {
        let reply = match cmd {
            Command::Version => Reply::Ack(self.board.version().as_bytes().to_vec()),
            Command::Send { total, chunk } => self.start_download(total, chunk),
            Command::Data { offset, chunk } => self.receive_data(offset, chunk),
            Command::Authenticate => match self.check_image() {
                Ok(()) => status(self.board.authenticate(&self.image), NackReason::AuthFailed),
                Err(r) => Reply::Nack(r),
            },
            Command::Strap(value) => status(self.board.set_strapping(value), NackReason::InvalidArgument),
            Command::TraceLevel(level) => {
                let filter = trace_filter(level);
                info!("trace level {level} -> {filter}");
                log::set_max_level(filter);
                Reply::ack()
            }
            Command::OtpProgram { offset, data } => {
                status(self.board.otp_program(offset, data), NackReason::OtpProgram)
            }
            Command::OtpRandom { offset, len } => {
                if len == 0 {
                    Reply::Nack(NackReason::InvalidArgument)
                } else {
                    status(self.board.otp_program_random(offset, len), NackReason::OtpProgram)
                }
            }
            Command::OtpCommitEmulation => {
                status(self.board.otp_commit_emulation(), NackReason::OtpProgram)
            }
            Command::OtpRegions(list) => self.program_regions(list),
            Command::OtpRead {
                offset,
                len,
                emulated,
            } => self.otp_read(offset, len, emulated),
            Command::SjtagChallenge => match self.board.sjtag_nonce() {
                Ok(nonce) => {
                    self.challenge = Some(nonce);
                    Reply::Ack(nonce.to_vec())
                }
                Err(e) => Reply::Nack(board_nack(e, NackReason::SjtagUnlock)),
            },
            Command::SjtagResponse(response) => self.sjtag_unlock(response),
            Command::WriteFip => match self.check_image() {
                Ok(()) => status(self.board.write_fip(&self.image), NackReason::WriteFailed),
                Err(r) => Reply::Nack(r),
            },
            Command::WriteRaw { offset } => match self.check_image() {
                Ok(()) => status(
                    self.board.write_raw(offset, &self.image),
                    NackReason::WriteFailed,
                ),
                Err(r) => Reply::Nack(r),
            },
            Command::Bind => match self.check_image() {
                Ok(()) => status(self.board.bind_fip(&self.image), NackReason::BindFailed),
                Err(r) => Reply::Nack(r),
            },
            Command::Continue => return (Reply::ack(), Some(Exit::Continue)),
            Command::Reset => return (Reply::ack(), Some(Exit::Reset)),
        };

        (reply, None)
    }

    fn start_download(&mut self, total: u32, chunk: &[u8]) -> Reply {
        self.image.clear();
        self.announced = 0;

        if total as usize > self.config.image_capacity {
            warn!(
                "announced image of {total} bytes exceeds {} byte buffer",
                self.config.image_capacity
            );
            return Reply::Nack(NackReason::TooMuchData);
        }

        info!("download started, {total} bytes announced");
        self.announced = total;
        self.receive_data(0, chunk)
    }

    /// Appends a chunk, which must start exactly where the previous one
    /// ended.
    fn receive_data(&mut self, offset: u32, chunk: &[u8]) -> Reply {
        let expected = self.image.len();
        if offset as usize != expected {
            warn!("data at {offset:#x}, expected {expected:#x}");
            return Reply::Nack(NackReason::Misordering);
        }

        let end = expected + chunk.len();
        let limit = match self.announced {
            0 => self.config.image_capacity,
            n => n as usize,
        };
        if end > limit {
            warn!("data to {end:#x} overruns {limit:#x}");
            return Reply::Nack(NackReason::TooMuchData);
        }

        self.image.extend_from_slice(chunk);
        if self.announced != 0 && end == limit {
            info!("download complete, {end} bytes");
        }

        Reply::ack()
    }

    fn check_image(&self) -> Result<(), NackReason> {
        if self.image.is_empty() {
            return Err(NackReason::NoImage);
        }
        if self.announced != 0 && self.image.len() < self.announced as usize {
            warn!(
                "only {} of {} bytes downloaded",
                self.image.len(),
                self.announced
            );
            return Err(NackReason::Incomplete);
        }
        Ok(())
    }

    fn program_regions(&mut self, list: &[u8]) -> Reply {
        // Command::decode already validated the list
        for region in regions(list).flatten() {
            debug!(
                "programming {} bytes of OTP at {:#x}",
                region.data.len(),
                region.offset
            );
            if let Err(e) = self.board.otp_program(region.offset, region.data) {
                warn!("OTP region at {:#x} failed: {e}", region.offset);
                return Reply::Nack(board_nack(e, NackReason::OtpProgram));
            }
        }
        Reply::ack()
    }

    fn otp_read(&mut self, offset: u32, len: u32, emulated: bool) -> Reply {
        if len as usize > self.config.max_payload {
            return Reply::Nack(NackReason::TooMuchData);
        }

        let mut buf = vec![0u8; len as usize];
        match self.board.otp_read(offset, &mut buf, emulated) {
            Ok(()) => Reply::Ack(buf),
            Err(e) => Reply::Nack(board_nack(e, NackReason::OtpRead)),
        }
    }

    fn sjtag_unlock(&mut self, response: &[u8; SJTAG_LEN]) -> Reply {
        // A challenge is good for one attempt
        let challenge = match self.challenge.take() {
            Some(c) => c,
            None => return Reply::Nack(NackReason::NoChallenge),
        };

        let key = match self.board.sjtag_key() {
            Ok(k) => k,
            Err(e) => return Reply::Nack(board_nack(e, NackReason::SjtagUnlock)),
        };

        if sjtag_response(&challenge, &key) != *response {
            warn!("SJTAG response mismatch");
            return Reply::Nack(NackReason::SjtagUnlock);
        }

        status(self.board.sjtag_unlock(), NackReason::SjtagUnlock)
    }
}
