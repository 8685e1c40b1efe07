// src/core/store/connection.rs

//! A single asynchronous RESP connection to the backing store.

use super::{Reply, StoreCommand};
use crate::core::GeoCacheError;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

/// A connection that speaks RESP2 request/response with the store.
///
/// The read buffer lives on the connection so bytes of a reply that arrive
/// together with the previous one are never lost between calls.
#[derive(Debug)]
pub struct RespConnection {
    stream: TcpStream,
    codec: RespFrameCodec,
    read_buf: BytesMut,
    io_timeout: Duration,
}

impl RespConnection {
    /// Connects to `addr` within `io_timeout`.
    pub async fn connect(addr: &str, io_timeout: Duration) -> Result<Self, GeoCacheError> {
        let stream = tokio::time::timeout(io_timeout, TcpStream::connect(addr)).await??;
        stream.set_nodelay(true)?;
        debug!("Opened store connection to {addr}");
        Ok(Self {
            stream,
            codec: RespFrameCodec,
            read_buf: BytesMut::with_capacity(4096),
            io_timeout,
        })
    }

    /// Authenticates and selects the logical database, as configured.
    pub async fn handshake(
        &mut self,
        password: Option<&str>,
        database: u32,
    ) -> Result<(), GeoCacheError> {
        if let Some(password) = password {
            let reply = self
                .round_trip(RespFrame::command(["AUTH".to_string(), password.to_string()]))
                .await?;
            expect_ok("AUTH", reply)?;
        }
        if database != 0 {
            let reply = self
                .round_trip(RespFrame::command(["SELECT".to_string(), database.to_string()]))
                .await?;
            expect_ok("SELECT", reply)?;
        }
        Ok(())
    }

    /// Sends a single frame and waits for its reply.
    pub async fn round_trip(&mut self, frame: RespFrame) -> Result<RespFrame, GeoCacheError> {
        self.write_frames(std::iter::once(frame)).await?;
        self.read_frame().await
    }

    /// Runs `commands` inside `MULTI`/`EXEC`, writing the whole transaction in
    /// one go and returning the typed replies from the `EXEC` array.
    pub async fn transaction(
        &mut self,
        commands: &[StoreCommand],
    ) -> Result<Vec<Reply>, GeoCacheError> {
        let frames = std::iter::once(RespFrame::command(["MULTI"]))
            .chain(commands.iter().map(StoreCommand::to_frame))
            .chain(std::iter::once(RespFrame::command(["EXEC"])));
        self.write_frames(frames).await?;

        // The whole batch is already on the wire. If MULTI is refused, the
        // server answers each command and EXEC on their own, so those replies
        // are read and discarded before the connection can be reused.
        if let Err(err) = expect_ok("MULTI", self.read_frame().await?) {
            for _ in 0..=commands.len() {
                self.read_frame().await?;
            }
            return Err(err);
        }

        // Every queued command must be acknowledged before EXEC's reply. A
        // rejected command makes the server abort the transaction, but its
        // EXEC reply still has to be drained to keep the stream in sync.
        let mut queue_error = None;
        for command in commands {
            match self.read_frame().await? {
                RespFrame::SimpleString(s) if s == "QUEUED" => {}
                RespFrame::Error(msg) => {
                    queue_error.get_or_insert(GeoCacheError::StoreReply(format!(
                        "{} rejected: {msg}",
                        command.name()
                    )));
                }
                other => {
                    return Err(GeoCacheError::Protocol(format!(
                        "unexpected reply while queueing {}: {other:?}",
                        command.name()
                    )));
                }
            }
        }

        let exec_reply = self.read_frame().await?;
        if let Some(err) = queue_error {
            return Err(err);
        }
        match exec_reply {
            RespFrame::Array(frames) if frames.len() == commands.len() => commands
                .iter()
                .zip(frames)
                .map(|(command, frame)| command.reply_from_frame(frame))
                .collect(),
            RespFrame::Array(frames) => Err(GeoCacheError::Protocol(format!(
                "EXEC returned {} replies for {} commands",
                frames.len(),
                commands.len()
            ))),
            RespFrame::NullArray => Err(GeoCacheError::Store(
                "transaction was aborted by the store".to_string(),
            )),
            RespFrame::Error(msg) => Err(GeoCacheError::StoreReply(msg)),
            other => Err(GeoCacheError::Protocol(format!(
                "unexpected EXEC reply: {other:?}"
            ))),
        }
    }

    async fn write_frames(
        &mut self,
        frames: impl IntoIterator<Item = RespFrame>,
    ) -> Result<(), GeoCacheError> {
        let mut write_buf = BytesMut::new();
        for frame in frames {
            self.codec.encode(frame, &mut write_buf)?;
        }
        tokio::time::timeout(self.io_timeout, self.stream.write_all(&write_buf)).await??;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<RespFrame, GeoCacheError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.read_buf)? {
                return Ok(frame);
            }
            let read = tokio::time::timeout(
                self.io_timeout,
                self.stream.read_buf(&mut self.read_buf),
            )
            .await??;
            if read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "store closed the connection",
                )
                .into());
            }
        }
    }
}

fn expect_ok(what: &str, reply: RespFrame) -> Result<(), GeoCacheError> {
    match reply {
        RespFrame::SimpleString(s) if s == "OK" => Ok(()),
        RespFrame::Error(msg) => Err(GeoCacheError::StoreReply(msg)),
        other => Err(GeoCacheError::Protocol(format!(
            "unexpected {what} reply: {other:?}"
        ))),
    }
}
