//! The message catalogue and its binary codec.
//!
//! Every variant owns a stable u32 tag used as the wire discriminant.
//! Tags are append-only; renumbering breaks deployed agents.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtoError, Result};
use crate::types::{MemoryAllocation, MemoryProtection, Pointer, ResponseFlags};

mod tag {
    pub const STATUS_RESPONSE: u32 = 1;
    pub const STATUS_WITH_VALUE_RESPONSE: u32 = 2;
    pub const CLOSE_PROCESS_REQUEST: u32 = 3;
    pub const IS_VALID_REQUEST: u32 = 4;
    pub const READ_MEMORY_REQUEST: u32 = 5;
    pub const WRITE_MEMORY_REQUEST: u32 = 6;
    pub const ALLOCATE_MEMORY_REQUEST: u32 = 7;
    pub const FREE_MEMORY_REQUEST: u32 = 8;
    pub const QUERY_MEMORY_REQUEST: u32 = 9;
    pub const PROTECT_MEMORY_REQUEST: u32 = 10;
    pub const CALL_FUNCTION_REQUEST: u32 = 11;
    pub const ALLOCATE_CONSOLE_REQUEST: u32 = 12;
    pub const CREATE_FUNCTION_REQUEST: u32 = 13;
    pub const FREE_FUNCTION_REQUEST: u32 = 14;
    pub const REMOTE_CALL_REQUEST: u32 = 15;
    pub const REMOTE_CALL_RESPONSE: u32 = 16;
}

/// One protocol message, request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Plain success/failure verdict.
    StatusResponse { success: bool },
    /// Verdict plus a value buffer; on failure the buffer carries the
    /// error text.
    StatusWithValueResponse { success: bool, value: Bytes },
    /// Ask the agent to terminate the target process.
    CloseProcessRequest,
    /// Liveness probe.
    IsValidRequest,
    ReadMemoryRequest {
        address: Pointer,
        size: u32,
    },
    WriteMemoryRequest {
        address: Pointer,
        data: Bytes,
    },
    AllocateMemoryRequest {
        size: u32,
        allocation: MemoryAllocation,
        protection: MemoryProtection,
    },
    FreeMemoryRequest {
        address: Pointer,
    },
    QueryMemoryRequest {
        address: Pointer,
    },
    ProtectMemoryRequest {
        address: Pointer,
        size: u32,
        protection: MemoryProtection,
    },
    /// Invoke a native function in the target at `address`.
    CallFunctionRequest {
        address: Pointer,
        args: Vec<Pointer>,
    },
    AllocateConsoleRequest,
    /// Register a named controller function; the agent answers with
    /// the trampoline address it assigned.
    CreateFunctionRequest {
        name: String,
        arity: u32,
    },
    FreeFunctionRequest {
        name: String,
    },
    /// Agent-initiated call into a controller-registered function.
    RemoteCallRequest {
        name: String,
        args: Vec<Pointer>,
    },
    RemoteCallResponse {
        return_value: Pointer,
        flags: ResponseFlags,
    },
}

impl Message {
    /// Stable wire discriminant of this variant.
    pub fn tag(&self) -> u32 {
        match self {
            Message::StatusResponse { .. } => tag::STATUS_RESPONSE,
            Message::StatusWithValueResponse { .. } => tag::STATUS_WITH_VALUE_RESPONSE,
            Message::CloseProcessRequest => tag::CLOSE_PROCESS_REQUEST,
            Message::IsValidRequest => tag::IS_VALID_REQUEST,
            Message::ReadMemoryRequest { .. } => tag::READ_MEMORY_REQUEST,
            Message::WriteMemoryRequest { .. } => tag::WRITE_MEMORY_REQUEST,
            Message::AllocateMemoryRequest { .. } => tag::ALLOCATE_MEMORY_REQUEST,
            Message::FreeMemoryRequest { .. } => tag::FREE_MEMORY_REQUEST,
            Message::QueryMemoryRequest { .. } => tag::QUERY_MEMORY_REQUEST,
            Message::ProtectMemoryRequest { .. } => tag::PROTECT_MEMORY_REQUEST,
            Message::CallFunctionRequest { .. } => tag::CALL_FUNCTION_REQUEST,
            Message::AllocateConsoleRequest => tag::ALLOCATE_CONSOLE_REQUEST,
            Message::CreateFunctionRequest { .. } => tag::CREATE_FUNCTION_REQUEST,
            Message::FreeFunctionRequest { .. } => tag::FREE_FUNCTION_REQUEST,
            Message::RemoteCallRequest { .. } => tag::REMOTE_CALL_REQUEST,
            Message::RemoteCallResponse { .. } => tag::REMOTE_CALL_RESPONSE,
        }
    }

    /// Human-readable variant name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::StatusResponse { .. } => "StatusResponse",
            Message::StatusWithValueResponse { .. } => "StatusWithValueResponse",
            Message::CloseProcessRequest => "CloseProcessRequest",
            Message::IsValidRequest => "IsValidRequest",
            Message::ReadMemoryRequest { .. } => "ReadMemoryRequest",
            Message::WriteMemoryRequest { .. } => "WriteMemoryRequest",
            Message::AllocateMemoryRequest { .. } => "AllocateMemoryRequest",
            Message::FreeMemoryRequest { .. } => "FreeMemoryRequest",
            Message::QueryMemoryRequest { .. } => "QueryMemoryRequest",
            Message::ProtectMemoryRequest { .. } => "ProtectMemoryRequest",
            Message::CallFunctionRequest { .. } => "CallFunctionRequest",
            Message::AllocateConsoleRequest => "AllocateConsoleRequest",
            Message::CreateFunctionRequest { .. } => "CreateFunctionRequest",
            Message::FreeFunctionRequest { .. } => "FreeFunctionRequest",
            Message::RemoteCallRequest { .. } => "RemoteCallRequest",
            Message::RemoteCallResponse { .. } => "RemoteCallResponse",
        }
    }

    /// Encode tag and body into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32_le(self.tag());
        match self {
            Message::StatusResponse { success } => {
                put_bool(dst, *success);
            }
            Message::StatusWithValueResponse { success, value } => {
                put_bool(dst, *success);
                put_buffer(dst, value);
            }
            Message::CloseProcessRequest
            | Message::IsValidRequest
            | Message::AllocateConsoleRequest => {}
            Message::ReadMemoryRequest { address, size } => {
                dst.put_u64_le(address.as_u64());
                dst.put_u32_le(*size);
            }
            Message::WriteMemoryRequest { address, data } => {
                dst.put_u64_le(address.as_u64());
                put_buffer(dst, data);
            }
            Message::AllocateMemoryRequest {
                size,
                allocation,
                protection,
            } => {
                dst.put_u32_le(*size);
                dst.put_u32_le(allocation.bits());
                dst.put_u32_le(protection.bits());
            }
            Message::FreeMemoryRequest { address } | Message::QueryMemoryRequest { address } => {
                dst.put_u64_le(address.as_u64());
            }
            Message::ProtectMemoryRequest {
                address,
                size,
                protection,
            } => {
                dst.put_u64_le(address.as_u64());
                dst.put_u32_le(*size);
                dst.put_u32_le(protection.bits());
            }
            Message::CallFunctionRequest { address, args } => {
                dst.put_u64_le(address.as_u64());
                put_pointer_list(dst, args);
            }
            Message::CreateFunctionRequest { name, arity } => {
                put_string(dst, name);
                dst.put_u32_le(*arity);
            }
            Message::FreeFunctionRequest { name } => {
                put_string(dst, name);
            }
            Message::RemoteCallRequest { name, args } => {
                put_string(dst, name);
                put_pointer_list(dst, args);
            }
            Message::RemoteCallResponse {
                return_value,
                flags,
            } => {
                dst.put_u64_le(return_value.as_u64());
                dst.put_u32_le(flags.bits());
            }
        }
    }

    /// Encode into a fresh payload buffer.
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode a full payload (tag + body).
    ///
    /// Trailing bytes after the variant body are tolerated; a tag no
    /// variant claims is [`ProtoError::UnknownTag`].
    pub fn decode(payload: &[u8]) -> Result<Message> {
        let mut buf = payload;
        if buf.remaining() < 4 {
            return Err(ProtoError::Truncated { tag: 0 });
        }
        let tag = buf.get_u32_le();
        let mut body = Body { buf, tag };

        let message = match tag {
            tag::STATUS_RESPONSE => Message::StatusResponse {
                success: body.bool()?,
            },
            tag::STATUS_WITH_VALUE_RESPONSE => Message::StatusWithValueResponse {
                success: body.bool()?,
                value: body.buffer()?,
            },
            tag::CLOSE_PROCESS_REQUEST => Message::CloseProcessRequest,
            tag::IS_VALID_REQUEST => Message::IsValidRequest,
            tag::READ_MEMORY_REQUEST => Message::ReadMemoryRequest {
                address: body.pointer()?,
                size: body.u32()?,
            },
            tag::WRITE_MEMORY_REQUEST => Message::WriteMemoryRequest {
                address: body.pointer()?,
                data: body.buffer()?,
            },
            tag::ALLOCATE_MEMORY_REQUEST => Message::AllocateMemoryRequest {
                size: body.u32()?,
                allocation: MemoryAllocation::from_bits(body.u32()?),
                protection: MemoryProtection::from_bits(body.u32()?),
            },
            tag::FREE_MEMORY_REQUEST => Message::FreeMemoryRequest {
                address: body.pointer()?,
            },
            tag::QUERY_MEMORY_REQUEST => Message::QueryMemoryRequest {
                address: body.pointer()?,
            },
            tag::PROTECT_MEMORY_REQUEST => Message::ProtectMemoryRequest {
                address: body.pointer()?,
                size: body.u32()?,
                protection: MemoryProtection::from_bits(body.u32()?),
            },
            tag::CALL_FUNCTION_REQUEST => Message::CallFunctionRequest {
                address: body.pointer()?,
                args: body.pointer_list()?,
            },
            tag::ALLOCATE_CONSOLE_REQUEST => Message::AllocateConsoleRequest,
            tag::CREATE_FUNCTION_REQUEST => Message::CreateFunctionRequest {
                name: body.string()?,
                arity: body.u32()?,
            },
            tag::FREE_FUNCTION_REQUEST => Message::FreeFunctionRequest {
                name: body.string()?,
            },
            tag::REMOTE_CALL_REQUEST => Message::RemoteCallRequest {
                name: body.string()?,
                args: body.pointer_list()?,
            },
            tag::REMOTE_CALL_RESPONSE => Message::RemoteCallResponse {
                return_value: body.pointer()?,
                flags: ResponseFlags::from_bits(body.u32()?),
            },
            other => return Err(ProtoError::UnknownTag(other)),
        };

        Ok(message)
    }
}

fn put_bool(dst: &mut BytesMut, value: bool) {
    dst.put_u8(u8::from(value));
}

fn put_buffer(dst: &mut BytesMut, data: &[u8]) {
    dst.put_u32_le(data.len() as u32);
    dst.put_slice(data);
}

fn put_string(dst: &mut BytesMut, value: &str) {
    put_buffer(dst, value.as_bytes());
}

fn put_pointer_list(dst: &mut BytesMut, args: &[Pointer]) {
    dst.put_u32_le(args.len() as u32);
    for arg in args {
        dst.put_u64_le(arg.as_u64());
    }
}

/// Cursor over a variant body; every read is bounds-checked so a short
/// payload surfaces as a typed error carrying the offending tag.
struct Body<'a> {
    buf: &'a [u8],
    tag: u32,
}

impl Body<'_> {
    fn need(&self, len: usize) -> Result<()> {
        if self.buf.remaining() < len {
            return Err(ProtoError::Truncated { tag: self.tag });
        }
        Ok(())
    }

    fn bool(&mut self) -> Result<bool> {
        self.need(1)?;
        Ok(self.buf.get_u8() != 0)
    }

    fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    fn pointer(&mut self) -> Result<Pointer> {
        self.need(8)?;
        Ok(Pointer::new(self.buf.get_u64_le()))
    }

    fn buffer(&mut self) -> Result<Bytes> {
        let len = self.u32()? as usize;
        self.need(len)?;
        let data = Bytes::copy_from_slice(&self.buf[..len]);
        self.buf.advance(len);
        Ok(data)
    }

    fn string(&mut self) -> Result<String> {
        let raw = self.buffer()?;
        let text = std::str::from_utf8(&raw)?;
        Ok(text.to_owned())
    }

    fn pointer_list(&mut self) -> Result<Vec<Pointer>> {
        let count = self.u32()? as usize;
        self.need(count.saturating_mul(8))?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(Pointer::new(self.buf.get_u64_le()));
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: Message) {
        let payload = message.encode_to_bytes();
        let decoded = Message::decode(&payload).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn status_responses_roundtrip() {
        roundtrip(Message::StatusResponse { success: true });
        roundtrip(Message::StatusResponse { success: false });
        roundtrip(Message::StatusWithValueResponse {
            success: true,
            value: Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8]),
        });
        roundtrip(Message::StatusWithValueResponse {
            success: false,
            value: Bytes::new(),
        });
    }

    #[test]
    fn bodyless_requests_roundtrip() {
        roundtrip(Message::CloseProcessRequest);
        roundtrip(Message::IsValidRequest);
        roundtrip(Message::AllocateConsoleRequest);
    }

    #[test]
    fn memory_requests_roundtrip() {
        roundtrip(Message::ReadMemoryRequest {
            address: Pointer::new(0x7FFE_0000_1000),
            size: 4096,
        });
        roundtrip(Message::WriteMemoryRequest {
            address: Pointer::new(0x1000),
            data: Bytes::from_static(b"patched"),
        });
        roundtrip(Message::WriteMemoryRequest {
            address: Pointer::NULL,
            data: Bytes::new(),
        });
        roundtrip(Message::AllocateMemoryRequest {
            size: 0x2000,
            allocation: MemoryAllocation::COMMIT | MemoryAllocation::RESERVE,
            protection: MemoryProtection::EXECUTE_READ_WRITE,
        });
        roundtrip(Message::FreeMemoryRequest {
            address: Pointer::new(0xAB00),
        });
        roundtrip(Message::QueryMemoryRequest {
            address: Pointer::new(u64::MAX),
        });
        roundtrip(Message::ProtectMemoryRequest {
            address: Pointer::new(0x4000),
            size: 0x1000,
            protection: MemoryProtection::READ_ONLY | MemoryProtection::GUARD,
        });
    }

    #[test]
    fn function_messages_roundtrip() {
        roundtrip(Message::CallFunctionRequest {
            address: Pointer::new(0x1400_0100),
            args: vec![Pointer::new(1), Pointer::new(u64::MAX), Pointer::NULL],
        });
        roundtrip(Message::CallFunctionRequest {
            address: Pointer::new(0x1400_0100),
            args: Vec::new(),
        });
        roundtrip(Message::CreateFunctionRequest {
            name: "on_damage".to_owned(),
            arity: 3,
        });
        roundtrip(Message::FreeFunctionRequest {
            name: "on_damage".to_owned(),
        });
        roundtrip(Message::RemoteCallRequest {
            name: "on_damage".to_owned(),
            args: vec![Pointer::new(0x10), Pointer::new(0x20)],
        });
        roundtrip(Message::RemoteCallRequest {
            name: String::new(),
            args: Vec::new(),
        });
        roundtrip(Message::RemoteCallResponse {
            return_value: Pointer::new(0xFFFF_FFFF_FFFF_FFFF),
            flags: ResponseFlags::PRINT_STACK,
        });
    }

    #[test]
    fn unknown_tag_is_typed_error() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(999);
        let err = Message::decode(&buf).unwrap_err();
        assert!(matches!(err, ProtoError::UnknownTag(999)));
    }

    #[test]
    fn truncated_body_is_typed_error() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(5); // ReadMemoryRequest
        buf.put_u32_le(0x1000); // half a pointer
        let err = Message::decode(&buf).unwrap_err();
        assert!(matches!(err, ProtoError::Truncated { tag: 5 }));
    }

    #[test]
    fn truncated_buffer_length_is_typed_error() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(2); // StatusWithValueResponse
        buf.put_u8(1);
        buf.put_u32_le(100); // declares 100 bytes, carries none
        let err = Message::decode(&buf).unwrap_err();
        assert!(matches!(err, ProtoError::Truncated { tag: 2 }));
    }

    #[test]
    fn invalid_utf8_name_is_typed_error() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(14); // FreeFunctionRequest
        buf.put_u32_le(2);
        buf.put_slice(&[0xFF, 0xFE]);
        let err = Message::decode(&buf).unwrap_err();
        assert!(matches!(err, ProtoError::InvalidString(_)));
    }

    #[test]
    fn empty_payload_is_truncated() {
        let err = Message::decode(&[]).unwrap_err();
        assert!(matches!(err, ProtoError::Truncated { .. }));
    }

    #[test]
    fn tags_are_stable() {
        assert_eq!(Message::StatusResponse { success: true }.tag(), 1);
        assert_eq!(Message::CloseProcessRequest.tag(), 3);
        assert_eq!(Message::AllocateConsoleRequest.tag(), 12);
        assert_eq!(
            Message::RemoteCallResponse {
                return_value: Pointer::NULL,
                flags: ResponseFlags::NONE,
            }
            .tag(),
            16
        );
    }
}
