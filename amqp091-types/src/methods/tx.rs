//! Methods of the tx class (class id 90)
//!
//! All tx methods have empty bodies; the class id and method id are the
//! whole payload.

use crate::codec::{CodecError, Decoder, Encoder};

macro_rules! empty_method {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name;

        impl $name {
            pub(crate) fn encode(&self, _e: &mut Encoder<'_>) -> Result<(), CodecError> {
                Ok(())
            }

            pub(crate) fn decode(_d: &mut Decoder<'_>) -> Result<Self, CodecError> {
                Ok(Self)
            }
        }
    };
}

empty_method! {
    /// Puts the channel into transactional mode
    Select
}

empty_method! {
    /// Confirms a [`Select`]
    SelectOk
}

empty_method! {
    /// Commits the current transaction
    Commit
}

empty_method! {
    /// Confirms a [`Commit`]
    CommitOk
}

empty_method! {
    /// Abandons the current transaction
    Rollback
}

empty_method! {
    /// Confirms a [`Rollback`]
    RollbackOk
}
