//! RPC request body (packet type 0x03).
//!
//! Used for stored procedure calls and for parameterised execution through
//! `sp_executesql`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::write_utf16;
use crate::encode::{declare_type, infer_meta, write_type_info, write_value};
use crate::error::WireError;
use crate::headers::write_all_headers;
use crate::meta::TypeMeta;
use crate::value::Value;

/// Well-known procedure ids recognised without a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ProcId {
    /// sp_executesql, the parameterised-query workhorse.
    ExecuteSql = 0x000A,
    /// sp_prepare.
    Prepare = 0x000B,
    /// sp_execute.
    Execute = 0x000C,
    /// sp_prepexec.
    PrepExec = 0x000D,
    /// sp_unprepare.
    Unprepare = 0x000F,
}

/// Direction of an RPC parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamDirection {
    /// Input only.
    #[default]
    Input,
    /// Output: sent as a typed placeholder, returned via RETURNVALUE.
    Output,
    /// Sent with a value and returned via RETURNVALUE.
    InputOutput,
}

impl ParamDirection {
    /// Whether the by-reference status bit is set.
    #[must_use]
    pub fn is_by_ref(&self) -> bool {
        !matches!(self, Self::Input)
    }
}

/// One RPC parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Name with or without the leading `@` (added on the wire if missing).
    pub name: String,
    /// Direction.
    pub direction: ParamDirection,
    /// Value; for `Output` this is typically [`Value::Null`] and only the
    /// inferred TYPE_INFO travels.
    pub value: Value,
    /// Explicit wire type; inferred from the value when absent.
    pub meta: Option<TypeMeta>,
}

impl Param {
    /// An input parameter.
    #[must_use]
    pub fn input(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            direction: ParamDirection::Input,
            value: value.into(),
            meta: None,
        }
    }

    /// An output placeholder typed like `exemplar`.
    ///
    /// The value itself does not travel; the server learns the TYPE_INFO and
    /// reports the result in a RETURNVALUE token.
    #[must_use]
    pub fn output(name: impl Into<String>, exemplar: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            direction: ParamDirection::Output,
            value: Value::Null,
            meta: Some(infer_meta(&exemplar.into())),
        }
    }

    /// An input/output parameter.
    #[must_use]
    pub fn input_output(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            direction: ParamDirection::InputOutput,
            value: value.into(),
            meta: None,
        }
    }

    fn wire_meta(&self) -> TypeMeta {
        self.meta.clone().unwrap_or_else(|| infer_meta(&self.value))
    }

    fn wire_name(&self) -> String {
        if self.name.is_empty() || self.name.starts_with('@') {
            self.name.clone()
        } else {
            format!("@{}", self.name)
        }
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<(), WireError> {
        let name = self.wire_name();
        let name_chars = name.encode_utf16().count() as u8;
        dst.put_u8(name_chars);
        write_utf16(dst, &name);

        let mut status = 0u8;
        if self.direction.is_by_ref() {
            status |= 0x01;
        }
        dst.put_u8(status);

        let meta = self.wire_meta();
        write_type_info(dst, &meta);
        write_value(dst, &meta, &self.value)
    }
}

/// The procedure being invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Name(String),
    Id(ProcId),
}

/// RPC request builder.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    target: Target,
    params: Vec<Param>,
    with_recompile: bool,
}

impl RpcRequest {
    /// Call a procedure by name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            target: Target::Name(name.into()),
            params: Vec::new(),
            with_recompile: false,
        }
    }

    /// Call a well-known procedure by id.
    #[must_use]
    pub fn by_id(id: ProcId) -> Self {
        Self {
            target: Target::Id(id),
            params: Vec::new(),
            with_recompile: false,
        }
    }

    /// Run `sql` with typed parameters through `sp_executesql`.
    #[must_use]
    pub fn execute_sql(sql: &str, params: Vec<Param>) -> Self {
        let mut request = Self::by_id(ProcId::ExecuteSql);
        request.params.push(Param::input("", sql));
        if !params.is_empty() {
            let declarations = declarations(&params);
            request.params.push(Param::input("", declarations));
        }
        request.params.extend(params);
        request
    }

    /// Append a parameter.
    #[must_use]
    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Request plan recompilation.
    #[must_use]
    pub fn with_recompile(mut self, value: bool) -> Self {
        self.with_recompile = value;
        self
    }

    /// The parameters of this request.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Encode the request body with the given transaction descriptor.
    pub fn encode(&self, transaction_descriptor: u64) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(256);
        write_all_headers(&mut buf, transaction_descriptor);

        match &self.target {
            Target::Id(id) => {
                buf.put_u16_le(0xFFFF);
                buf.put_u16_le(*id as u16);
            }
            Target::Name(name) => {
                buf.put_u16_le(name.encode_utf16().count() as u16);
                write_utf16(&mut buf, name);
            }
        }

        buf.put_u16_le(u16::from(self.with_recompile));

        for param in &self.params {
            param.encode(&mut buf)?;
        }

        Ok(buf.freeze())
    }
}

/// The `@p1 int, @p2 nvarchar(12)` declaration string for `sp_executesql`.
fn declarations(params: &[Param]) -> String {
    params
        .iter()
        .enumerate()
        .map(|(index, param)| {
            let name = if param.name.is_empty() {
                format!("@p{}", index + 1)
            } else {
                param.wire_name()
            };
            let mut decl = format!("{} {}", name, declare_type(&param.wire_meta()));
            if param.direction.is_by_ref() {
                decl.push_str(" output");
            }
            decl
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::headers::ALL_HEADERS_LEN;

    #[test]
    fn proc_ids() {
        assert_eq!(ProcId::ExecuteSql as u16, 0x000A);
        assert_eq!(ProcId::Unprepare as u16, 0x000F);
    }

    #[test]
    fn execute_sql_carries_statement_and_declarations() {
        let request = RpcRequest::execute_sql(
            "SELECT * FROM t WHERE id = @id",
            vec![Param::input("@id", 42i32)],
        );
        // statement + declarations + the parameter itself
        assert_eq!(request.params().len(), 3);
        assert_eq!(
            request.params()[1].value.as_str(),
            Some("@id int")
        );
    }

    #[test]
    fn well_known_id_on_the_wire() {
        let request = RpcRequest::by_id(ProcId::ExecuteSql);
        let body = request.encode(0).unwrap();
        // After ALL_HEADERS: 0xFFFF marker then the proc id.
        assert_eq!(&body[ALL_HEADERS_LEN..ALL_HEADERS_LEN + 4], &[0xFF, 0xFF, 0x0A, 0x00]);
    }

    #[test]
    fn named_procedure_on_the_wire() {
        let body = RpcRequest::named("dbo.p").encode(0).unwrap();
        assert_eq!(&body[ALL_HEADERS_LEN..ALL_HEADERS_LEN + 2], &[5, 0]);
        assert_eq!(body[ALL_HEADERS_LEN + 2], b'd');
    }

    #[test]
    fn output_param_is_by_ref_with_null_value() {
        let param = Param::output("@y", 0i32);
        assert!(param.direction.is_by_ref());
        assert_eq!(param.value, Value::Null);

        let mut buf = BytesMut::new();
        param.encode(&mut buf).unwrap();
        // name(1 + 4) + status + type info (0x26, maxlen) + null value length
        assert_eq!(buf[5], 0x01); // by-ref status bit
        assert_eq!(buf[6], 0x26); // INTN
        assert_eq!(buf[7], 4); // max length from the exemplar
        assert_eq!(buf[8], 0); // NULL value
    }

    #[test]
    fn bare_names_gain_an_at_sign() {
        let param = Param::input("id", 1i32);
        assert_eq!(param.wire_name(), "@id");
        let named = Param::input("@id", 1i32);
        assert_eq!(named.wire_name(), "@id");
    }

    #[test]
    fn output_declarations_are_marked() {
        let decls = declarations(&[
            Param::input("@x", 7i32),
            Param::output("@y", 0i32),
        ]);
        assert_eq!(decls, "@x int, @y int output");
    }
}
