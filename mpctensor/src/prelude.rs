pub use crate::arithmetic::{ArithmeticSharedTensor, PadValue, PublicTensor};
pub use crate::binary::BinarySharedTensor;
pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::fixedpoint::FixedPointEncoding;
pub use crate::networking::{Communicator, LocalCommunicator, LocalNetwork};
pub use crate::prng::RawSeed;
pub use crate::ring::{IndexElem, RingTensor, SliceElem};
pub use crate::session::Session;
pub use crate::tensor::{Backing, MpcTensor, Operand};
pub use crate::triples::{DealerProvider, TripleProvider, TrustedDealer};
