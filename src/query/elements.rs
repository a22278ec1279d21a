//! Structural element counting for payloads JSON cannot represent.
//!
//! Walks a value through `serde` without producing output and counts every
//! leaf value and map key. Used as the size fallback when canonical
//! serialization fails (e.g. maps keyed by tuples).

use std::fmt;

use serde::ser::{self, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub(crate) struct CountError(String);

impl ser::Error for CountError {
    fn custom<M: fmt::Display>(msg: M) -> Self {
        CountError(msg.to_string())
    }
}

/// Number of leaves and map keys in `value`, or `None` if its `Serialize`
/// impl fails on its own.
pub(crate) fn count_elements<T: Serialize + ?Sized>(value: &T) -> Option<usize> {
    let mut counter = ElementCounter { elements: 0 };
    value.serialize(&mut counter).ok()?;
    Some(counter.elements)
}

struct ElementCounter {
    elements: usize,
}

impl ElementCounter {
    fn leaf(&mut self) -> Result<(), CountError> {
        self.elements += 1;
        Ok(())
    }
}

macro_rules! count_leaves {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method(self, _: $ty) -> Result<(), CountError> {
                self.leaf()
            }
        )*
    };
}

impl<'a> ser::Serializer for &'a mut ElementCounter {
    type Ok = ();
    type Error = CountError;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    count_leaves!(
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_f32(f32),
        serialize_f64(f64),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
    );

    fn serialize_none(self) -> Result<(), CountError> {
        self.leaf()
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<(), CountError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), CountError> {
        self.leaf()
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), CountError> {
        self.leaf()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> Result<(), CountError> {
        self.leaf()
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), CountError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<(), CountError> {
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self, CountError> {
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self, CountError> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _name: &'static str, _len: usize) -> Result<Self, CountError> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, CountError> {
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self, CountError> {
        Ok(self)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self, CountError> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, CountError> {
        Ok(self)
    }
}

impl<'a> ser::SerializeSeq for &'a mut ElementCounter {
    type Ok = ();
    type Error = CountError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CountError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CountError> {
        Ok(())
    }
}

impl<'a> ser::SerializeTuple for &'a mut ElementCounter {
    type Ok = ();
    type Error = CountError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CountError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CountError> {
        Ok(())
    }
}

impl<'a> ser::SerializeTupleStruct for &'a mut ElementCounter {
    type Ok = ();
    type Error = CountError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CountError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CountError> {
        Ok(())
    }
}

impl<'a> ser::SerializeTupleVariant for &'a mut ElementCounter {
    type Ok = ();
    type Error = CountError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CountError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CountError> {
        Ok(())
    }
}

impl<'a> ser::SerializeMap for &'a mut ElementCounter {
    type Ok = ();
    type Error = CountError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), CountError> {
        key.serialize(&mut **self)
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CountError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CountError> {
        Ok(())
    }
}

impl<'a> ser::SerializeStruct for &'a mut ElementCounter {
    type Ok = ();
    type Error = CountError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), CountError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CountError> {
        Ok(())
    }
}

impl<'a> ser::SerializeStructVariant for &'a mut ElementCounter {
    type Ok = ();
    type Error = CountError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), CountError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CountError> {
        Ok(())
    }
}
