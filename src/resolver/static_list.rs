use super::AddressListener;
use crate::address::AddressSet;
use crate::error::Result;

/// Resolver over a fixed list of `host[:port]` endpoints
#[derive(Debug, Clone)]
pub struct StaticResolver {
    addresses: AddressSet,
}

impl StaticResolver {
    /// Parse `endpoints` into an address set.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEndpoint`] naming the first endpoint that
    /// cannot be parsed.
    pub fn new<I, S>(endpoints: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self::from_addresses(AddressSet::parse(endpoints)?))
    }

    pub fn from_addresses(addresses: AddressSet) -> Self {
        Self { addresses }
    }

    pub fn addresses(&self) -> &AddressSet {
        &self.addresses
    }

    /// Deliver the whole address set as one list.
    pub fn start(&self, listener: &dyn AddressListener) {
        tracing::debug!("Static resolver delivering {} address(es)", self.addresses.len());
        listener.on_addresses(self.addresses.to_vec());
    }
}
