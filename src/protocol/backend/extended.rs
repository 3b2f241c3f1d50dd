//! Extended query protocol backend messages.

use crate::error::{Error, Result};
use crate::protocol::codec::{read_u16, read_u32};
use crate::protocol::types::Oid;

macro_rules! empty_message {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl $name {
            /// Validate the (empty) payload.
            pub fn parse(payload: &[u8]) -> Result<Self> {
                if !payload.is_empty() {
                    return Err(Error::Protocol(format!(
                        concat!(stringify!($name), " with {} payload bytes"),
                        payload.len()
                    )));
                }
                Ok(Self)
            }
        }
    };
}

empty_message!(
    /// ParseComplete: the statement was parsed.
    ParseComplete
);
empty_message!(
    /// BindComplete: the portal was created.
    BindComplete
);
empty_message!(
    /// CloseComplete: the statement or portal was released.
    CloseComplete
);
empty_message!(
    /// NoData: the statement returns no rows.
    NoData
);

/// ParameterDescription: the types the server assigned to each parameter.
#[derive(Debug, Clone)]
pub struct ParameterDescription {
    param_oids: Vec<Oid>,
}

impl ParameterDescription {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (count, mut data) = read_u16(payload)?;
        let mut param_oids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (oid, rest) = read_u32(data)?;
            param_oids.push(oid);
            data = rest;
        }
        Ok(Self { param_oids })
    }

    /// Parameter type OIDs in placeholder order.
    pub fn oids(&self) -> &[Oid] {
        &self.param_oids
    }

    pub fn into_oids(self) -> Vec<Oid> {
        self.param_oids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_description() {
        let payload = [0, 2, 0, 0, 0, 23, 0, 0, 4, 19];
        let desc = ParameterDescription::parse(&payload).unwrap();
        assert_eq!(desc.oids(), &[23, 1043]);
    }

    #[test]
    fn test_parameter_description_truncated() {
        assert!(ParameterDescription::parse(&[0, 2, 0, 0, 0, 23]).is_err());
    }

    #[test]
    fn test_empty_messages_reject_payload() {
        assert!(ParseComplete::parse(&[]).is_ok());
        assert!(BindComplete::parse(&[1]).is_err());
    }
}
