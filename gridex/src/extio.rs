//! Extend AsyncRead and AsyncWrite with some convenience methods for binary i/o
//!
use std::io;

use async_trait::async_trait;
use cid::Cid;
use futures::{io as aio, AsyncReadExt, AsyncWriteExt};
use unsigned_varint::{
    aio::read_u64 as varint_read_u64,
    encode::{u64 as varint_encode_u64, u64_buffer as varint_u64_buffer},
};

use crate::errors::{Error, Result};

#[async_trait]
pub(crate) trait Serialize: Sized {
    /// Write self to a stream
    async fn write_to(&self, stream: &mut (impl aio::AsyncWrite + Unpin + Send)) -> Result<()>;

    /// Read Self from a stream
    async fn read_from(stream: &mut (impl aio::AsyncRead + Unpin + Send)) -> Result<Self>;
}

#[async_trait]
pub(crate) trait ExtendedAsyncRead: aio::AsyncRead {
    /// Read a byte from a stream
    async fn read_byte(&mut self) -> io::Result<u8>;

    /// Read a Big Endian encoded 16 bit unsigned integer from a stream
    async fn read_u16(&mut self) -> io::Result<u16>;

    /// Read a Big Endian encoded 32 bit signed integer from a stream
    async fn read_i32(&mut self) -> io::Result<i32>;

    /// Read a Big Endian encoded 32 bit unsigned integer from a stream
    async fn read_u32(&mut self) -> io::Result<u32>;

    /// Read a Big Endian encoded 64 bit signed integer from a stream
    async fn read_i64(&mut self) -> io::Result<i64>;

    /// Read a Big Endian encoded 64 bit unsigned integer from a stream
    async fn read_u64(&mut self) -> io::Result<u64>;

    /// Read a Big Endian encoded 64 bit float from a stream
    async fn read_f64(&mut self) -> io::Result<f64>;

    /// Read a length prefixed UTF-8 string from a stream
    async fn read_string(&mut self) -> Result<String>;

    /// Read a CID from a stream
    async fn read_cid(&mut self) -> Result<Cid>;
}

#[async_trait]
impl<R: aio::AsyncRead + Unpin + Send> ExtendedAsyncRead for R {
    async fn read_byte(&mut self) -> io::Result<u8> {
        let mut buffer = [0; 1];
        self.read_exact(&mut buffer).await?;

        Ok(buffer[0])
    }

    async fn read_u16(&mut self) -> io::Result<u16> {
        let mut buffer = [0; 2];
        self.read_exact(&mut buffer).await?;

        Ok(u16::from_be_bytes(buffer))
    }

    async fn read_i32(&mut self) -> io::Result<i32> {
        let mut buffer = [0; 4];
        self.read_exact(&mut buffer).await?;

        Ok(i32::from_be_bytes(buffer))
    }

    async fn read_u32(&mut self) -> io::Result<u32> {
        let mut buffer = [0; 4];
        self.read_exact(&mut buffer).await?;

        Ok(u32::from_be_bytes(buffer))
    }

    async fn read_i64(&mut self) -> io::Result<i64> {
        let mut buffer = [0; 8];
        self.read_exact(&mut buffer).await?;

        Ok(i64::from_be_bytes(buffer))
    }

    async fn read_u64(&mut self) -> io::Result<u64> {
        let mut buffer = [0; 8];
        self.read_exact(&mut buffer).await?;

        Ok(u64::from_be_bytes(buffer))
    }

    async fn read_f64(&mut self) -> io::Result<f64> {
        let mut buffer = [0; 8];
        self.read_exact(&mut buffer).await?;

        Ok(f64::from_be_bytes(buffer))
    }

    async fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32().await? as usize;
        let mut buffer = vec![0; len];
        self.read_exact(&mut buffer).await?;

        String::from_utf8(buffer).map_err(|err| Error::Corrupt(err.to_string()))
    }

    async fn read_cid(&mut self) -> Result<Cid> {
        let mut bytes = vec![];
        let version = varint_read_u64(&mut *self).await?;
        let codec = varint_read_u64(&mut *self).await?;

        // CIDv0 has the fixed `0x12 0x20` prefix
        if [version, codec] == [0x12, 0x20] {
            bytes.push(version as u8);
            bytes.push(codec as u8);
            self.take(32).read_to_end(&mut bytes).await?;
        } else {
            let code = varint_read_u64(&mut *self).await?;
            let size = varint_read_u64(&mut *self).await?;

            let mut varint_buf = varint_u64_buffer();
            for word in [version, codec, code, size] {
                bytes.extend_from_slice(varint_encode_u64(word, &mut varint_buf));
            }

            self.take(size).read_to_end(&mut bytes).await?;
        }

        Ok(Cid::try_from(bytes)?)
    }
}

#[async_trait]
pub(crate) trait ExtendedAsyncWrite: aio::AsyncWrite {
    /// Write a byte to a stream
    async fn write_byte(&mut self, byte: u8) -> io::Result<()>;

    /// Write a Big Endian encoded 16 bit unsigned integer to a stream
    async fn write_u16(&mut self, word: u16) -> io::Result<()>;

    /// Write a Big Endian encoded 32 bit signed integer to a stream
    async fn write_i32(&mut self, word: i32) -> io::Result<()>;

    /// Write a Big Endian encoded 32 bit unsigned integer to a stream
    async fn write_u32(&mut self, word: u32) -> io::Result<()>;

    /// Write a Big Endian encoded 64 bit signed integer to a stream
    async fn write_i64(&mut self, word: i64) -> io::Result<()>;

    /// Write a Big Endian encoded 64 bit unsigned integer to a stream
    async fn write_u64(&mut self, word: u64) -> io::Result<()>;

    /// Write a Big Endian encoded 64 bit float to a stream
    async fn write_f64(&mut self, word: f64) -> io::Result<()>;

    /// Write a length prefixed UTF-8 string to a stream
    async fn write_string(&mut self, s: &str) -> io::Result<()>;

    /// Write a Cid to a stream
    async fn write_cid(&mut self, cid: &Cid) -> Result<()>;
}

#[async_trait]
impl<W: aio::AsyncWrite + Unpin + Send> ExtendedAsyncWrite for W {
    async fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.write_all(&[byte]).await
    }

    async fn write_u16(&mut self, word: u16) -> io::Result<()> {
        self.write_all(&word.to_be_bytes()).await
    }

    async fn write_i32(&mut self, word: i32) -> io::Result<()> {
        self.write_all(&word.to_be_bytes()).await
    }

    async fn write_u32(&mut self, word: u32) -> io::Result<()> {
        self.write_all(&word.to_be_bytes()).await
    }

    async fn write_i64(&mut self, word: i64) -> io::Result<()> {
        self.write_all(&word.to_be_bytes()).await
    }

    async fn write_u64(&mut self, word: u64) -> io::Result<()> {
        self.write_all(&word.to_be_bytes()).await
    }

    async fn write_f64(&mut self, word: f64) -> io::Result<()> {
        self.write_all(&word.to_be_bytes()).await
    }

    async fn write_string(&mut self, s: &str) -> io::Result<()> {
        self.write_u32(s.len() as u32).await?;
        self.write_all(s.as_bytes()).await
    }

    async fn write_cid(&mut self, cid: &Cid) -> Result<()> {
        self.write_all(&cid.to_bytes()).await?;

        Ok(())
    }
}
