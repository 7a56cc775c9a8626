//! Durable object state: the binary buffer format used for everything that
//! reaches the object store.
//!
//! Values carry no self-describing tags beyond their fixed widths. A reader must
//! unpack values in exactly the order and with exactly the types they were
//! packed. Integers and floats are big endian; byte arrays and strings carry a
//! `u32` length prefix; a [`Uid`] is its 16 raw bytes.

use crate::{Result, TxError, Uid};

/// Write-only object state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputObjectState {
    uid: Uid,
    type_name: String,
    buffer: Vec<u8>,
}

impl OutputObjectState {
    /// Create an empty state owned by `uid` with logical type `type_name`.
    pub fn new(uid: Uid, type_name: impl Into<String>) -> Self {
        Self {
            uid,
            type_name: type_name.into(),
            buffer: Vec::new(),
        }
    }

    /// Owning identifier.
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Logical type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Packed bytes so far.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of packed bytes.
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard packed data, keeping uid and type name.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Convert into a read-only state positioned at the first value.
    pub fn into_input(self) -> InputObjectState {
        InputObjectState {
            uid: self.uid,
            type_name: self.type_name,
            buffer: self.buffer,
            cursor: 0,
        }
    }

    pub fn pack_bool(&mut self, value: bool) {
        self.buffer.push(u8::from(value));
    }

    pub fn pack_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn pack_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn pack_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn pack_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn pack_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn pack_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Pack a length-prefixed byte array.
    pub fn pack_bytes(&mut self, value: &[u8]) -> Result<()> {
        let len = u32::try_from(value.len())
            .map_err(|_| TxError::corrupt(format!("byte array too long: {}", value.len())))?;
        self.buffer.extend_from_slice(&len.to_be_bytes());
        self.buffer.extend_from_slice(value);
        Ok(())
    }

    /// Append bytes as they are, with no length prefix.
    pub fn pack_raw(&mut self, value: &[u8]) {
        self.buffer.extend_from_slice(value);
    }

    /// Pack a length-prefixed UTF-8 string.
    pub fn pack_string(&mut self, value: &str) -> Result<()> {
        self.pack_bytes(value.as_bytes())
    }

    pub fn pack_uid(&mut self, value: &Uid) {
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Pack another state, including its uid and type name.
    pub fn pack_state(&mut self, state: &OutputObjectState) -> Result<()> {
        self.pack_uid(&state.uid);
        self.pack_string(&state.type_name)?;
        self.pack_bytes(&state.buffer)
    }
}

/// Read-only object state with a cursor over its buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputObjectState {
    uid: Uid,
    type_name: String,
    buffer: Vec<u8>,
    cursor: usize,
}

impl InputObjectState {
    /// Wrap raw bytes read from storage.
    pub fn from_bytes(uid: Uid, type_name: impl Into<String>, buffer: Vec<u8>) -> Self {
        Self {
            uid,
            type_name: type_name.into(),
            buffer,
            cursor: 0,
        }
    }

    /// Copy an output state for local round-tripping.
    pub fn from_output(state: &OutputObjectState) -> Self {
        state.clone().into_input()
    }

    /// Owning identifier.
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Logical type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Entire buffer regardless of cursor position.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Total size of the buffer.
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes not yet unpacked.
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Move the cursor back to the first value.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Convert back into a write-only state holding the same bytes.
    pub fn into_output(self) -> OutputObjectState {
        OutputObjectState {
            uid: self.uid,
            type_name: self.type_name,
            buffer: self.buffer,
        }
    }

    fn take(&mut self, len: usize) -> Result<&[u8]> {
        if self.remaining() < len {
            return Err(TxError::corrupt(format!(
                "state {} ({}) exhausted: wanted {} bytes at offset {}, {} left",
                self.uid,
                self.type_name,
                len,
                self.cursor,
                self.remaining()
            )));
        }
        let start = self.cursor;
        self.cursor += len;
        Ok(&self.buffer[start..self.cursor])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn unpack_bool(&mut self) -> Result<bool> {
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(TxError::corrupt(format!("invalid boolean byte {other}"))),
        }
    }

    pub fn unpack_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn unpack_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn unpack_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn unpack_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn unpack_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.take_array()?))
    }

    pub fn unpack_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    pub fn unpack_bytes(&mut self) -> Result<Vec<u8>> {
        let len = u32::from_be_bytes(self.take_array()?) as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn unpack_string(&mut self) -> Result<String> {
        let bytes = self.unpack_bytes()?;
        String::from_utf8(bytes).map_err(|e| TxError::corrupt(format!("invalid UTF-8: {e}")))
    }

    pub fn unpack_uid(&mut self) -> Result<Uid> {
        Ok(Uid::from_bytes(self.take_array()?))
    }

    /// Unpack a state written by [`OutputObjectState::pack_state`].
    pub fn unpack_state(&mut self) -> Result<InputObjectState> {
        let uid = self.unpack_uid()?;
        let type_name = self.unpack_string()?;
        let buffer = self.unpack_bytes()?;
        Ok(InputObjectState::from_bytes(uid, type_name, buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_round_trip_in_order() {
        let uid = Uid::new();
        let mut out = OutputObjectState::new(uid, "/Test/Object");
        out.pack_bool(true);
        out.pack_i32(-42);
        out.pack_i64(i64::MAX);
        out.pack_f64(1.5);
        out.pack_string("héllo").unwrap();
        out.pack_uid(&uid);

        let mut input = out.into_input();
        assert_eq!(input.uid(), uid);
        assert_eq!(input.type_name(), "/Test/Object");
        assert!(input.unpack_bool().unwrap());
        assert_eq!(input.unpack_i32().unwrap(), -42);
        assert_eq!(input.unpack_i64().unwrap(), i64::MAX);
        assert_eq!(input.unpack_f64().unwrap(), 1.5);
        assert_eq!(input.unpack_string().unwrap(), "héllo");
        assert_eq!(input.unpack_uid().unwrap(), uid);
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn test_exhausted_buffer_is_corrupt() {
        let mut out = OutputObjectState::new(Uid::new(), "/Test");
        out.pack_i32(7);
        let mut input = out.into_input();
        assert_eq!(input.unpack_i32().unwrap(), 7);
        let err = input.unpack_i64().unwrap_err();
        assert_eq!(err.error_code(), "CORRUPT_STATE");
    }

    #[test]
    fn test_bad_length_prefix_is_corrupt() {
        let mut out = OutputObjectState::new(Uid::new(), "/Test");
        out.pack_i32(1_000);
        let mut input = out.into_input();
        assert!(input.unpack_string().is_err());
    }

    #[test]
    fn test_nested_state() {
        let inner_uid = Uid::new();
        let mut inner = OutputObjectState::new(inner_uid, "/Inner");
        inner.pack_i32(5);

        let mut outer = OutputObjectState::new(Uid::new(), "/Outer");
        outer.pack_state(&inner).unwrap();
        outer.pack_bool(false);

        let mut input = outer.into_input();
        let mut nested = input.unpack_state().unwrap();
        assert_eq!(nested.uid(), inner_uid);
        assert_eq!(nested.type_name(), "/Inner");
        assert_eq!(nested.unpack_i32().unwrap(), 5);
        assert!(!input.unpack_bool().unwrap());
    }

    #[test]
    fn test_raw_bytes_read_back_as_packed() {
        let mut first = OutputObjectState::new(Uid::new(), "/Test");
        first.pack_i32(11);
        first.pack_string("abc").unwrap();

        let mut copy = OutputObjectState::new(first.uid(), "/Test");
        copy.pack_raw(first.buffer());
        assert_eq!(copy.buffer(), first.buffer());

        let mut input = copy.into_input();
        assert_eq!(input.unpack_i32().unwrap(), 11);
        assert_eq!(input.unpack_string().unwrap(), "abc");
    }

    #[test]
    fn test_reset_and_rewind_keep_identity() {
        let uid = Uid::new();
        let mut out = OutputObjectState::new(uid, "/Test");
        out.pack_u64(9);
        out.reset();
        assert!(out.is_empty());
        assert_eq!(out.uid(), uid);

        out.pack_u64(10);
        let mut input = InputObjectState::from_output(&out);
        assert_eq!(input.unpack_u64().unwrap(), 10);
        input.rewind();
        assert_eq!(input.unpack_u64().unwrap(), 10);
        assert_eq!(input.into_output(), out);
    }

    #[derive(Debug, Clone)]
    enum Packed {
        Bool(bool),
        U8(u8),
        I32(i32),
        I64(i64),
        F32(f32),
        F64(f64),
        Str(String),
        Bytes(Vec<u8>),
    }

    fn value_strategy() -> impl Strategy<Value = Packed> {
        prop_oneof![
            any::<bool>().prop_map(Packed::Bool),
            any::<u8>().prop_map(Packed::U8),
            any::<i32>().prop_map(Packed::I32),
            any::<i64>().prop_map(Packed::I64),
            any::<f32>()
                .prop_filter("NaN never compares equal", |f| !f.is_nan())
                .prop_map(Packed::F32),
            any::<f64>()
                .prop_filter("NaN never compares equal", |f| !f.is_nan())
                .prop_map(Packed::F64),
            ".*".prop_map(Packed::Str),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(Packed::Bytes),
        ]
    }

    proptest! {
        #[test]
        fn prop_pack_then_unpack_yields_original(values in proptest::collection::vec(value_strategy(), 0..32)) {
            let mut out = OutputObjectState::new(Uid::new(), "/Prop");
            for value in &values {
                match value {
                    Packed::Bool(v) => out.pack_bool(*v),
                    Packed::U8(v) => out.pack_u8(*v),
                    Packed::I32(v) => out.pack_i32(*v),
                    Packed::I64(v) => out.pack_i64(*v),
                    Packed::F32(v) => out.pack_f32(*v),
                    Packed::F64(v) => out.pack_f64(*v),
                    Packed::Str(v) => out.pack_string(v).unwrap(),
                    Packed::Bytes(v) => out.pack_bytes(v).unwrap(),
                }
            }

            let mut input = out.into_input();
            for value in &values {
                match value {
                    Packed::Bool(v) => prop_assert_eq!(input.unpack_bool().unwrap(), *v),
                    Packed::U8(v) => prop_assert_eq!(input.unpack_u8().unwrap(), *v),
                    Packed::I32(v) => prop_assert_eq!(input.unpack_i32().unwrap(), *v),
                    Packed::I64(v) => prop_assert_eq!(input.unpack_i64().unwrap(), *v),
                    Packed::F32(v) => prop_assert_eq!(input.unpack_f32().unwrap(), *v),
                    Packed::F64(v) => prop_assert_eq!(input.unpack_f64().unwrap(), *v),
                    Packed::Str(v) => prop_assert_eq!(&input.unpack_string().unwrap(), v),
                    Packed::Bytes(v) => prop_assert_eq!(&input.unpack_bytes().unwrap(), v),
                }
            }
            prop_assert_eq!(input.remaining(), 0);
        }
    }
}
