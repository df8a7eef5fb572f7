use num_bigint::{BigUint, RandBigInt};

use crate::{Error, Result};

/// Size in bits of the private exponents.
const EXPONENT_BITS: u64 = 512;

/// The 1024-bit MODP group from RFC 2409, section 6.2.
const OAKLEY_GROUP_2: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381",
    "FFFFFFFFFFFFFFFF",
);

/// The 2048-bit MODP group from RFC 3526, section 3.
const MODP_GROUP_14: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

/// The 4096-bit MODP group from RFC 3526, section 5.
const MODP_GROUP_16: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AAAC42DAD33170D04507A33A85521ABDF1CBA64",
    "ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6B",
    "F12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB31",
    "43DB5BFCE0FD108E4B82D120A92108011A723C12A787E6D7",
    "88719A10BDBA5B2699C327186AF4E23C1A946834B6150BDA",
    "2583E9CA2AD44CE8DBBBC2DB04DE8EF92E8EFC141FBECAA6",
    "287C59474E6BC05D99B2964FA090C3A2233BA186515BE7ED",
    "1F612970CEE2D7AFB81BDD762170481CD0069127D5B05AA9",
    "93B4EA988D8FDDC186FFB7DC90A6C08F4DF435C934063199",
    "FFFFFFFFFFFFFFFF",
);

/// A finite-field group for the Diffie-Hellman key-exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub p: BigUint,
    pub g: BigUint,
}

impl Group {
    fn well_known(prime: &str) -> Result<Self> {
        Ok(Self {
            p: BigUint::parse_bytes(prime.as_bytes(), 16).ok_or(Error::KexError)?,
            g: BigUint::from(2u8),
        })
    }

    pub fn group1() -> Result<Self> {
        Self::well_known(OAKLEY_GROUP_2)
    }

    pub fn group14() -> Result<Self> {
        Self::well_known(MODP_GROUP_14)
    }

    pub fn group16() -> Result<Self> {
        Self::well_known(MODP_GROUP_16)
    }

    /// Create a group from the parameters sent by a peer, bounded in size.
    pub fn from_parameters(p: &[u8], g: &[u8], min: u32, max: u32) -> Result<Self> {
        let group = Self {
            p: BigUint::from_bytes_be(p),
            g: BigUint::from_bytes_be(g),
        };
        let bits = group.p.bits();

        if bits < u64::from(min) || bits > u64::from(max) {
            return Err(Error::KexError);
        }
        group.validate(&group.g)?;

        Ok(group)
    }

    /// Select a group satisfying a group-exchange request, preferring the smallest one of at least `n` bits.
    pub fn for_request(min: u32, n: u32, max: u32) -> Result<Self> {
        let candidates = [Self::group14()?, Self::group16()?];
        let fits = |group: &&Self| {
            (u64::from(min)..=u64::from(max)).contains(&group.p.bits())
        };

        candidates
            .iter()
            .filter(fits)
            .find(|group| group.p.bits() >= u64::from(n))
            .or_else(|| candidates.iter().filter(fits).last())
            .cloned()
            .ok_or(Error::KexError)
    }

    /// Generate a private exponent and its public value.
    pub fn keypair(&self) -> (BigUint, BigUint) {
        let mut rng = rand::thread_rng();
        let bits = EXPONENT_BITS.min(self.p.bits().saturating_sub(1));
        let one = BigUint::from(1u8);

        let x = loop {
            let x = rng.gen_biguint(bits);

            if x > one {
                break x;
            }
        };
        let e = self.g.modpow(&x, &self.p);

        (x, e)
    }

    /// Ensure the public `value` lies in `]1, p - 1[`.
    pub fn validate(&self, value: &BigUint) -> Result<()> {
        let one = BigUint::from(1u8);

        if value <= &one || value >= &(&self.p - &one) {
            return Err(Error::KexError);
        }

        Ok(())
    }

    /// Compute the shared secret magnitude from the private exponent `x` and the `peer`'s public value.
    pub fn agree(&self, x: &BigUint, peer: &BigUint) -> Result<Vec<u8>> {
        self.validate(peer)?;

        Ok(peer.modpow(x, &self.p).to_bytes_be())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_group_sizes() {
        assert_eq!(Group::group1().unwrap().p.bits(), 1024);
        assert_eq!(Group::group14().unwrap().p.bits(), 2048);
        assert_eq!(Group::group16().unwrap().p.bits(), 4096);
    }

    #[test]
    fn request_prefers_the_smallest_sufficient_group() {
        assert_eq!(Group::for_request(2048, 2048, 8192).unwrap().p.bits(), 2048);
        assert_eq!(Group::for_request(2048, 3072, 8192).unwrap().p.bits(), 4096);
        assert_eq!(Group::for_request(1024, 8192, 2048).unwrap().p.bits(), 2048);
        assert!(Group::for_request(8192, 8192, 8192).is_err());
    }

    #[test]
    fn both_sides_agree() {
        let group = Group::group14().unwrap();
        let (x, e) = group.keypair();
        let (y, f) = group.keypair();

        assert_eq!(group.agree(&x, &f).unwrap(), group.agree(&y, &e).unwrap());
    }

    #[test]
    fn degenerate_values_are_rejected() {
        let group = Group::group1().unwrap();

        assert!(group.validate(&BigUint::from(1u8)).is_err());
        assert!(group.validate(&(&group.p - 1u8)).is_err());
        assert!(group.validate(&BigUint::from(2u8)).is_ok());
    }
}
