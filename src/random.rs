/// Blum-Blum-Shub pseudo-random generator, plus the additive-55
/// generator behind rand().
///
/// The Blum state squares a quadratic residue r modulo a Blum modulus
/// n = p*q (p, q prime, both 3 mod 4) and emits the low
/// floor(log2(bitlen(n))) bits of each new residue. Emitted bits queue in
/// a small buffer so callers can draw arbitrary widths; draws consume the
/// buffered bits most-significant first.
///
/// The twenty pregenerated moduli and residues ship as hex constants and
/// are parsed into limb arrays independent of host endianness, so every
/// host reproduces the same bit streams.

use crate::errors::ExecError;
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, ToPrimitive, Zero};
use once_cell::sync::Lazy;
use std::fmt;

/// Default Blum modulus (a 260-bit product of two primes, each 3 mod 4).
const N_DEFAULT: &str = "f2ac1903156af9e373d78613ed0e8d30284f34b644a9027d9ba55a689d6be18d9";
/// Default quadratic residue for the default modulus.
const R_DEFAULT: &str = "748b6d882ff4b074e2f1e93a8627d626506c73ca5a62546c90f23fd7ed3e7b11e";

/// The twenty pregenerated generators: (modulus, residue, window bits).
const PREGEN: &[(&str, &str, u32)] = &[
    ("5049440736fe328caf0db722d83de9361", "b226980f11d952e74e5dbb01a4cc42ec", 7),
    ("2c5348a2555dd374a18eb286ea9353443f1", "40f3d643446cd710e3e893616b21e3a218", 7),
    ("9cfd959d6ce4e3a81f1e0f2ca661f11d001f1", "fae5b44d9b64ff5cea4f3e142de2a0d7d76a", 7),
    ("3070f9245c894ed75df12a1a2decc680dfcc0751", "20c2d8131b2bdca2c0af8aa220ddba4b984570", 7),
    ("2109b1822db81a85b38f75aac680bc2fa5d3fe1118769a0108b99e5e799166ef1",
     "5e9b890eae33b792e821a9605f5df6db234f7b7d1e70aeed0e6c77c859e2efa9", 8),
    ("a7bfd9d7d9ada2c79f2dbf2185c6440263a38db775ee732dad85557f1e1ddf431",
     "5e94a02f88667154e097aedece1c925ce1f3495d2c98eccfc5dc2e80c9404daf", 8),
    ("43d87de8f2399ef237801cd5628643fcff569d6b0dcf53ce52882e7f602f9125cf9ec751",
     "13522d1ee014c7bfbe90767acced049d876aefcf18d4dd64f0b58c3992d2e5098d25e6", 8),
    ("5847126ca7eb4699b7f13c9ce7bdc91fed5bdbd2f99ad4a6c2b59cd9f0bc42e66a26742f11",
     "853016dca3269116b7e661fa3d344f9a28e9c9475597b4b8a35da929aae95f3a489dc674", 8),
    ("39e8be52322fd3218d923814e81b003d267bb0562157a3c1797b4f4a86752a84d895c3e08eb61c36a6ff096061c6fd0fdece0d62b16b66b980f95112745db4ab27e3d1",
     "b458f8ad1e6bbab915bfc01508864b787343bc42a8aa82d9d2880107e3fd8357c0bd02de3222796b2545e5ab7d81309a89baedaa5d9e8e59f959601ef2b87d4ed20d", 9),
    ("25f2435c9055666c23ef596882d7f98bd1448bf23b50e88250d3cc952c81b3ba524a02fd38582de74511c4008d4957302abe36c6092ce222ef9c73cc3cdc363b7e64b89",
     "66bb7e47b20e0c18401468787e2b707ca81ec9250df8cfc24b5ffbaaf2cf3008ed8b408d075d56f62c669fadc4f1751baf950d145f40ce23442aee594f5ad494cfc482", 9),
    ("497864de82bdb3094217d56b874ecd7769a791ea5ec5446757f3f9b6286e58704499daa2dd37a74925873cfa68f27533920ee1a9a729cf522014dab22e1a530c546ee069",
     "8684881cb5e630264a4465ae3af8b69ce3163f806549a7732339eea2c54d5c590f47fbcedfa07c1ef5628134d918fee5333fed9c094d65461d88b13a0aded356e38b04", 9),
    ("3457582ab3c0ccb15f08b8911665b18ca92bb7c2a12b4a1a66ee4251da190b15934c94e315a1bf41e048c7c7ce812fdd25d653416557d3f09887efad2b7f66d151f14c7b99",
     "df719bd1f648ed935870babd55490137758ca3b20add520da4c5e8cdcbfc4333a13f72a10b604eb7eeb07c573dd2c0208e736fe56ed081aa9488fbc45227dd68e207b4a0", 9),
    ("1517c19166b7dd21b5af734ed03d833daf66d82959a553563f4345bd439510a7bda8ee0cb6bf6a94286bfd66e49e25678c1ee99ceec891da8b18e8437575113aaf83c638c07137fdd3a76c3a49322a11b5a1a84c32d99cbb2b056671589917ed14cc7f1b5915f6495dd1892b4ed7417d79a63cc8aaa503a208e3420cca200323314fc49",
     "d42e8e9a560d1263fa648b04f6a69b706d2bc4918c3317ddd162cb4be7a5e3bbdd1564a4aadae9fd9f00548f730d5a68dc146f05216fe509f0b8f404902692de080bbeda0a11f445ff063935ce78a67445eae5c9cea5a8f6b9883faeda1bbe5f1ad3ef6409600e2f67b92ed007aba432b567cc26cf3e965e20722407bfe46b7736f5", 10),
    ("5e56a00e93c6f4e87479ac07b9d983d01f564618b314b4bfec7931eee85eb909179161e23e78d32110560b22956b22f3bc7e4a034b0586e463fd40c6f01a33e30ede912acb86a0c1e03483c45f289a271d14bd52792d0a076fdfefe32159054b217092237f0767434b3db112fee83005b33f925bacb3185cc4409a1abdef8c0fc116af01",
     "f7aa7cb67335096ef0c5d09b18f15415b9a564b609913f75f627fc6b0c5b686c86563fe86134c5a0ea19d243350dfc6b9936ba1512abafb81a0a6856c9ae7816bf2073c0fb58d8138352b261a704b3ce64d69dee6339010186b983677c84167d4973444194649ad6d71f8fa8f1f1c313edfbbbb6b1b220913cc8ea47a4db680ff9f190", 10),
    ("97dd840b9edfbcdb02c46c175ba81ca845352ebe470be6075326a26770cab84bfc0f2e82aa95aac14f40de42a0590445b902c2b8ebb916753e72ab86c3278cccc1a783b3e962d81b80df03e4380a8fa08b0d86ed0caa515c196a530e49c558ddb53082310b1d0c7aee6f92b619798624ffe6c337299bc51ff5d2c721061e7597c8d97079",
     "b8220703b8c75869ab99f9b50025daa8d77ca6df8cef423ede521f55b1c25d74fbf6d6cc31f5ef45e3b29660ef43797f226860a4aa1023dbe522b1fe6224d01eb77dee9ad97e8970e4a9e28e7391a6a70557fa0e46eca78866241ba3c126fc0c5469f8a2f65c33db95d1749d3f0381f401b9201e6abd43d98db92e808f0aaa6c3e2110", 10),
    ("456e348549b82fbb12b56f84c39f544cb89e43536ae8b2b497d426512c7f3c9cc2311e0503928284391959e379587bc173e6bc51ba51c856ba557fee8dd69cee4bd40845bd34691046534d967e40fe15b6d7cf61e30e283c05be993c44b6a2ea8ade0f5578bd3f618336d9731fed1f1c5996a5828d4ca857ac2dc9bd36184183f6d84346e1",
     "b0d7dcb19fb27a07973e921a4a4b6dcd7895ae8fced828de8a81a3dbf2524def719225404bfd4977a1508c4bac0f3bc356e9d83b9404b5bf86f6d19ff75645dffc9c5cc153a41772670a5e1ae87a9521416e117a0c0d415fb15d2454809bad45d6972f1ab367137e55ad0560d29ada9a2bcda8f4a70fbe04a1abe4a570605db87b4e8830", 10),
    ("6177813aeac0ffa3040b33be3c0f96e0faf97ca54266bfedd7be68494f76a7a91144598bf28b3a5a9dc35a6c9f58d0e5fb19839814bc9d456bff7f29953bdac7cafd66e2fc30531b8d544d2720b97025e22b1c71fa0b2eb9a499d49484615d07af7a3c23b568531e9b8507543362027ec5ebe0209b4647b7ff54be530e9ef50aa819c8ff11f6d7d0a00b25e88f2e6e9de4a7747022b949ab2c2e1ab0876e2f1177105718c60196f6c3ac0bde26e6cd4e5b8a20e9f0f60974f0b3868ff772ab2ceaf77f328d7244c9ad30e11a2700a120a314aff74c7f14396e2a39cc14a9fa6922ca0fce40304166b249b574ffd9cbb927f766c9b150e970a8d1edc24ebf72b72051",
     "53720b6eaf3bc3b8adf1dd665324c2d2fc5b2a62f32920c4e167537284da802fc106be4b0399caf97519486f31e0fa45a3a677c6cb265c5551ba4a5168a7ce3c29731a4e9345eac052ee1b84b7b3a82f906a67aaf7b35949fd7fc2f9f4fbc8c18689694c8d30810fff31ebee99b1cf029a33bd736750e7fe0a56f7e1d2a9b5321b5117fe9a10e46bf43c896e4a33faebd584f7431e7edbebd1703ccee5771b44f0c149888af1a4264cb9cf2e0294ea7719ed6fda1b09fa6e016c039aeb6d02a03281bcea8c278dd2a807eacae6e52ade048f58f2eb5193f4ffb9dd68467bc6f8e9d14286bfef09b0aec414c9dadfbf5c46d945d147b52aa1e0cbd625800522b41dac", 11),
    ("68f2a38fb61b42af07cb724fec0c7c65378efcbafb3514e268d7ee38e21a5680de03f4e63e1e52bde1218f689900be4e5407950539b9d28e9730e8e6ad6438008aa956b259cd965f3a9d02e1711e6b344b033de6425625b6346d2ca62e41605e8eae0a7e2f45c25119ef9eece4d3b18369e753419d94118d51803842f4de5956b8349e6a0a330145aa4cd1a72afd4ef9db5d8233068e69118ff4b93bcc67859f211886bb660033f8170640c6e3d61471c3b7dd62c595b156d77f317dc272d6b7e7f4fdc20ed82f172fe29776f3bddf697fb673c70defd6476198a408642ed62081447886a625812ac6576310f23036a7cd3c931c96f7df128ad4ed841351b18c8b78629",
     "4735e921f1ac6c3f0d5cda84cd835d75358be8966b99ff5e5d36bdb4be12c5e1df70ac249c0540a99113a8962778dc75dac65af9f3ab4672b4c575c49926f7f3f306fd122ac033961d042c416c3aa43b13ef51b764d505bb1f369ac7340f8913ddd812e9e75e8fde8c98700e1d3353da18f255e7303db3bcbbeda4bc5b8d472fbc9697f952cfc243c6f32f3f1bb4541e73ca03f5109df8037219a06430e88a6e94be870f8d36dbcc381a1c449c357753a535aa5666db92af2aaf1f50a3ddde95024d9161548c263973665a909bd325441a3c18fc70502f2c9a1c944adda164e84a8f3f0230ff2aef8304b5af333077e04920dba179158f6a2b3afb78df2ef9735ea3c63", 11),
    ("230d7ab23bb9e8d6788b252ad6534bdde276540721c3152e410ad4244deb0df28f4a6de063ba1e51d7cd1736c3d8410e2516b4eb903b8d9206b9202664cacbd0425c516833770d118bd5011f3de57e8f607684088255bf7da753056bf373715ed9a7ab85f698b965593fe2b674225fa0a02ebd87402ffb3d97172acadaa841664c361f7c11b2af47a472512ee815c970af831f95b737c342508e4c23f3148f3cdf622744c1dcfb69a43fd535e55eebcdc992ee62f2b52c94ac02e0921884fe275b3a528bdb14167b7dec3f3f390cd5a82d80c6c306624cc7a7814fb567cd4d687eede573358f43adfcf1e32f4ee7a2dc4af0296435ade8099bf0001d4ae0c7d204df490239c12d6b659a79",
     "8f1725f21e245e4fc17982196605b999518b4e21f65126fa6fa759332c8e27d80158b7537da39d001cc62b83bbef0713b1e82f8293dad522993f86d1761015414b2900e74fa23f3eaaa55b31cffd2e801fefb0ac73fd99b5d0cf9a635c3f4c73d8892d36ad053fc17a423cdcbcf07967a8608c7735e287d784ae089b3ddea9f2d2bb5d43d2ee25be346832e8dd186fc7a88d82847c03d1c05ee52c1f2a51a85f733338547fdbab657cb64b43d44d41148eb32ea68c7e66a8d47806f460cd6573b6ca1dd3eeaf1ce8db9621f1e121d2bb4a1878621dd2dbdd7b5390ab06a5dcd9307d6662eb4248dff2ee263ef2ab778e77724a14c62406967daa0d9ad4445064483193d53a5b7698ef473", 11),
    ("4fd2b820e0d8b13322e890dddc63a0267e5b3a648b03276066a3f356d79660c67704c1be6803b8e7590ee8a962c8331a05778d010e9ba10804d661f3354be1932f90babb741bd4302a07a92c42253fd4921864729fb0f0b1e0a42d66b6777893195abd2ee2141925624bf71ad7328360135c565064ee5027736f42a78b988f47407ba4f7996892ffdc5cf9e7ab78ac95734dbf4e3a3def1615b5b4341cfbf6c3d0a61b75f4974080bbac03ee9de55221302b40da0c50ded31d28a2f04921a532b3a486ae36e0bb5273e811d119adf90299a74e6233ccce7069676db00a3e8ce255a82fd9748b26546b98c8f4430a8db2a4b230fa365c51e0985801abba4bbcf3727f7c8765cc914d262fcec3c1d081",
     "46ef0184445feaa3099293ee960da14b0f8b046fa9f608241bc08ddeef17ee49194fd9bb2c302840e8da88c4e88df810ce387cc544209ec67656bd1da1e9920c7b1aad69448bb58455c9ae4e9cd926911b30d6b5843ff3d306d5654a41dc20e2de4eb174ec5ac3e6e70849de5d5f9166961207e2d8b31014cf35f801de8372881ae1ba79e58942e5bef0a7e40f46387bf775c54b1d15a1440e84beb39cd9e931f5638234ea730ed81d6fca1d7cea9e8ffb171f6ca22856264a36a2a783fd7ac39361a6598ed3a565d58acf1f5759bd294e5f53131bc8e4ee3750794df727b29b1f5788ae14e6a1d1a5b26c2947ed46f49e83773292d7dd5650580faebf85fd126ac98d98f47cf895abdc7ba048bd1a", 11),
];

fn hex(s: &str) -> BigUint {
    BigUint::parse_bytes(s.as_bytes(), 16).expect("builtin generator constant")
}

static DEFAULT_STATE: Lazy<BlumRng> = Lazy::new(|| BlumRng {
    seeded: true,
    bits: 0,
    buffer: 0,
    loglogn: 8,
    mask: 0xff,
    n: hex(N_DEFAULT),
    r: hex(R_DEFAULT),
});

static PREGEN_STATES: Lazy<Vec<BlumRng>> = Lazy::new(|| {
    PREGEN
        .iter()
        .map(|(n, r, loglogn)| BlumRng {
            seeded: true,
            bits: 0,
            buffer: 0,
            loglogn: *loglogn,
            mask: (1u64 << *loglogn) - 1,
            n: hex(n),
            r: hex(r),
        })
        .collect()
});

/// Seeds below 2^32 (other than 0) are reserved, as are negative seeds.
fn reserved_seed(seed: &BigInt) -> bool {
    (!seed.is_zero() && seed.bits() <= 32) || seed.sign() == Sign::Minus
}

#[derive(Clone, PartialEq, Eq)]
pub struct BlumRng {
    pub seeded: bool,
    /// Pending output bits, consumed most-significant first.
    buffer: u64,
    bits: u32,
    loglogn: u32,
    mask: u64,
    r: BigUint,
    n: BigUint,
}

impl fmt::Debug for BlumRng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BlumRng {{ bits: {}, loglogn: {}, n: {} bits }}",
            self.bits,
            self.loglogn,
            self.n.bits()
        )
    }
}

impl Default for BlumRng {
    fn default() -> Self {
        DEFAULT_STATE.clone()
    }
}

impl BlumRng {
    pub fn bit_buffer_count(&self) -> u32 {
        self.bits
    }

    pub fn residue(&self) -> &BigUint {
        &self.r
    }

    pub fn modulus(&self) -> &BigUint {
        &self.n
    }

    fn flush(&mut self) {
        self.bits = 0;
        self.buffer = 0;
    }

    /// Square the seed modulo the Blum modulus until the value first
    /// shrinks (modulus wrap); the result becomes the new residue.
    fn derive_residue(&mut self, seed: &BigUint) {
        let mut r = seed.clone();
        loop {
            let next = (&r * &r) % &self.n;
            let wrapped = next <= r;
            r = next;
            if wrapped {
                break;
            }
        }
        self.r = r;
    }

    /// srandom(seed): seed 0 restores the builtin default state; seeds
    /// of 2^32 and above derive a new residue for the current modulus;
    /// everything else is reserved.
    pub fn seed1(&mut self, seed: &BigInt) -> Result<(), ExecError> {
        if seed.is_zero() {
            *self = Self::default();
            return Ok(());
        }
        if reserved_seed(seed) {
            return Err(ExecError::domain("srandom seed must be 0 or >= 2^32"));
        }
        let mag = seed.magnitude().clone();
        self.derive_residue(&mag);
        self.flush();
        Ok(())
    }

    /// srandom(seed, newn): newn in [1,20] selects a pregenerated
    /// generator; newn >= 2^32 installs a user modulus (which must be
    /// 1 mod 4) and recomputes the extraction window.
    pub fn seed2(&mut self, seed: &BigInt, newn: &BigInt) -> Result<(), ExecError> {
        if newn.sign() == Sign::Minus {
            return Err(ExecError::domain("srandom newn must be [1,20] or >= 2^32"));
        }
        let newn_mag = newn.magnitude();
        if newn_mag.bits() <= 32 {
            if newn.is_zero() {
                return Err(ExecError::domain("srandom newn == 0 reserved for future use"));
            }
            let set = newn_mag.to_usize().unwrap_or(usize::MAX);
            if set > PREGEN_STATES.len() {
                return Err(ExecError::domain("srandom small newn must be [1,20]"));
            }
            let pre = &PREGEN_STATES[set - 1];
            self.n = pre.n.clone();
            self.loglogn = pre.loglogn;
            self.mask = pre.mask;
            if seed.is_zero() {
                self.r = pre.r.clone();
            } else {
                self.seed1(seed)?;
            }
        } else {
            if (newn_mag % 4u32).to_u32() != Some(1) {
                return Err(ExecError::domain("srandom large newn must be 1 mod 4"));
            }
            self.n = newn_mag.clone();
            // window = floor(log2(bitlength(n))), capped at 31
            let nlen = self.n.bits().saturating_sub(1);
            let mut loglogn = 31u32;
            if nlen > 0 && nlen <= u32::MAX as u64 {
                while (1u64 << loglogn) > nlen && loglogn > 1 {
                    loglogn -= 1;
                }
            }
            self.loglogn = loglogn;
            self.mask = (1u64 << loglogn) - 1;
            if seed.is_zero() {
                let r = BigInt::from(hex(R_DEFAULT));
                self.seed1(&r)?;
            } else {
                self.seed1(seed)?;
            }
        }
        self.flush();
        Ok(())
    }

    /// srandom(seed, ip, iq, trials): search upward from ip and iq for
    /// primes 3 mod 4 surviving `trials` Miller-Rabin rounds, install
    /// their product, then derive the residue from the seed.
    pub fn seed4(
        &mut self,
        seed: &BigInt,
        ip: &BigInt,
        iq: &BigInt,
        trials: u32,
    ) -> Result<(), ExecError> {
        if ip.sign() == Sign::Minus || iq.sign() == Sign::Minus {
            return Err(ExecError::domain("srandom prime search start must be positive"));
        }
        let floor = BigUint::from(1u64 << 16);
        if ip.magnitude() <= &floor || iq.magnitude() <= &floor {
            return Err(ExecError::domain("srandom prime search start must exceed 2^16"));
        }
        let p = next_cand(ip.magnitude(), trials)
            .ok_or_else(|| ExecError::domain("failed to find 1st Blum prime"))?;
        let q = next_cand(iq.magnitude(), trials)
            .ok_or_else(|| ExecError::domain("failed to find 2nd Blum prime"))?;
        let n = BigInt::from(&p * &q);
        self.seed2(seed, &n)
    }

    /// Turn the crank once: r <- r^2 mod n, refill the buffer with the
    /// low window bits.
    fn crank(&mut self) {
        self.r = (&self.r * &self.r) % &self.n;
        let low = self
            .r
            .iter_u64_digits()
            .next()
            .unwrap_or(0);
        self.buffer = low & self.mask;
        self.bits = self.loglogn;
    }

    /// Draw `cnt` random bits as an unsigned integer, most significant
    /// bits generated first.
    pub fn draw(&mut self, cnt: u64) -> BigUint {
        if cnt == 0 {
            return BigUint::zero();
        }
        let mut out = BigUint::zero();
        let mut remaining = cnt;
        if self.bits > 0 {
            if remaining <= self.bits as u64 {
                let take = remaining as u32;
                let chunk = self.buffer >> (self.bits - take);
                self.buffer &= (1u64 << (self.bits - take)) - 1;
                self.bits -= take;
                return BigUint::from(chunk);
            }
            out = BigUint::from(self.buffer);
            remaining -= self.bits as u64;
            self.flush();
        }
        while remaining > self.loglogn as u64 {
            self.crank();
            out = (out << self.loglogn) | BigUint::from(self.buffer);
            remaining -= self.loglogn as u64;
        }
        self.crank();
        let take = remaining as u32;
        out = (out << take) | BigUint::from(self.buffer >> (self.loglogn - take));
        self.bits = self.loglogn - take;
        self.buffer &= if self.bits == 64 { u64::MAX } else { (1u64 << self.bits) - 1 };
        out
    }

    /// Discard `cnt` output bits without producing them.
    pub fn skip(&mut self, cnt: u64) {
        let mut cnt = cnt;
        if self.bits > 0 {
            if (self.bits as u64) <= cnt {
                cnt -= self.bits as u64;
                self.flush();
            } else {
                self.buffer >>= cnt;
                self.bits -= cnt as u32;
                return;
            }
        }
        while cnt >= self.loglogn as u64 {
            self.crank();
            self.bits = 0;
            cnt -= self.loglogn as u64;
        }
        if cnt > 0 {
            self.crank();
            self.bits = self.loglogn - cnt as u32;
            self.buffer &= (1u64 << self.bits) - 1;
        }
    }

    /// Uniform draw in [low, beyond) by rejection: sample values of
    /// ceil(log2(range)) bits and retry those at or past the range.
    pub fn range(&mut self, low: &BigInt, beyond: &BigInt) -> Result<BigInt, ExecError> {
        if low >= beyond {
            return Err(ExecError::domain("random range is empty"));
        }
        let range = (beyond - low).magnitude().clone();
        if range.is_one() {
            return Ok(low.clone());
        }
        let bitlen = (&range - 1u32).bits();
        loop {
            let v = self.draw(bitlen);
            if v < range {
                return Ok(low + BigInt::from(v));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Prime search for srandom(seed, ip, iq, trials)
// ---------------------------------------------------------------------------

/// Smallest candidate >= start that is 3 mod 4 and passes `trials`
/// Miller-Rabin rounds. Gives up after a bounded scan.
fn next_cand(start: &BigUint, trials: u32) -> Option<BigUint> {
    let mut c = start.clone();
    let three = BigUint::from(3u32);
    let four = BigUint::from(4u32);
    let rem = &c % &four;
    if rem != three {
        // advance to the next value congruent to 3 mod 4
        let bump = (&three + &four - rem) % &four;
        c += bump;
    }
    for _ in 0..100_000u32 {
        if miller_rabin(&c, trials.max(1)) {
            return Some(c);
        }
        c += &four;
    }
    None
}

fn miller_rabin(n: &BigUint, trials: u32) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }
    let small: [u32; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];
    for &p in &small {
        let bp = BigUint::from(p);
        if n == &bp {
            return true;
        }
        if (n % &bp).is_zero() {
            return false;
        }
    }
    let n_minus_1 = n - 1u32;
    let s = n_minus_1.trailing_zeros().unwrap_or(0);
    let d = &n_minus_1 >> s;
    // deterministic witness schedule: small primes, then an LCG stream
    let mut lcg: u64 = 0x2545_f491_4f6c_dd1d;
    'witness: for i in 0..trials {
        let a = if (i as usize) < small.len() {
            BigUint::from(small[i as usize])
        } else {
            lcg = lcg.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (BigUint::from(lcg) % (n - 3u32)) + 2u32
        };
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_1 {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

// ---------------------------------------------------------------------------
// Additive-55 generator (rand / srand)
// ---------------------------------------------------------------------------

/// Lagged Fibonacci generator with taps 24/55, seeded through a 64-bit
/// mixing stream. Fast and reproducible, with none of the Blum
/// generator's cryptographic aims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRand {
    state: [u64; 55],
    j: usize,
    k: usize,
}

impl Default for AddRand {
    fn default() -> Self {
        let mut r = AddRand {
            state: [0; 55],
            j: 23,
            k: 54,
        };
        r.reseed(0x6162_6163_7573_2121);
        r
    }
}

impl AddRand {
    pub fn reseed(&mut self, seed: u64) {
        let mut x = seed.wrapping_add(0x9e37_79b9_7f4a_7c15);
        for s in self.state.iter_mut() {
            x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
            let mut z = x;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            *s = z ^ (z >> 31);
        }
        self.j = 23;
        self.k = 54;
    }

    pub fn next_u64(&mut self) -> u64 {
        let v = self.state[self.j].wrapping_add(self.state[self.k]);
        self.state[self.k] = v;
        self.j = if self.j == 0 { 54 } else { self.j - 1 };
        self.k = if self.k == 0 { 54 } else { self.k - 1 };
        v
    }

    pub fn range(&mut self, low: &BigInt, beyond: &BigInt) -> Result<BigInt, ExecError> {
        if low >= beyond {
            return Err(ExecError::domain("rand range is empty"));
        }
        let range = (beyond - low).magnitude().clone();
        if range.is_one() {
            return Ok(low.clone());
        }
        let bitlen = (&range - 1u32).bits();
        loop {
            let mut v = BigUint::zero();
            let mut got = 0u64;
            while got < bitlen {
                let take = (bitlen - got).min(64);
                let word = self.next_u64() >> (64 - take);
                v = (v << take) | BigUint::from(word);
                got += take;
            }
            if v < range {
                return Ok(low + BigInt::from(v));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_invariants() {
        let rng = BlumRng::default();
        assert!(rng.seeded);
        assert_eq!(rng.bit_buffer_count(), 0);
        assert!(rng.residue() < rng.modulus());
        assert!(!rng.residue().is_zero());
        assert_eq!(rng.loglogn, 8);
    }

    #[test]
    fn every_pregen_state_is_well_formed() {
        for (i, pre) in PREGEN_STATES.iter().enumerate() {
            assert!(pre.residue() < pre.modulus(), "pregen {}", i + 1);
            assert!(!pre.residue().is_zero(), "pregen {}", i + 1);
            // moduli of Blum form are 1 mod 4
            assert_eq!((pre.modulus() % 4u32).to_u32(), Some(1), "pregen {}", i + 1);
            let expect = {
                let nlen = pre.modulus().bits() - 1;
                (64 - (nlen as u64).leading_zeros() - 1) as u32
            };
            assert_eq!(pre.loglogn, expect, "pregen {} window", i + 1);
        }
    }

    #[test]
    fn reseeding_resets_the_buffer() {
        let mut rng = BlumRng::default();
        rng.draw(13);
        assert!(rng.bit_buffer_count() > 0);
        rng.seed1(&BigInt::zero()).unwrap();
        assert_eq!(rng.bit_buffer_count(), 0);
    }

    #[test]
    fn reserved_seeds_fail_in_every_form() {
        let mut rng = BlumRng::default();
        let s = BigInt::from(12345u32);
        assert!(rng.seed1(&s).is_err());
        assert!(rng.seed2(&s, &BigInt::from(5)).is_err());
        assert!(rng.seed1(&BigInt::from(-1)).is_err());
    }

    #[test]
    fn identical_seeds_give_identical_streams() {
        let mut a = BlumRng::default();
        let mut b = BlumRng::default();
        let seed = BigInt::from(1u64 << 40);
        a.seed1(&seed).unwrap();
        b.seed1(&seed).unwrap();
        for _ in 0..20 {
            assert_eq!(a.draw(17), b.draw(17));
        }
    }

    #[test]
    fn state_restore_replays_the_stream() {
        let mut rng = BlumRng::default();
        rng.draw(100);
        let saved = rng.clone();
        let first: Vec<BigUint> = (0..10).map(|_| rng.draw(13)).collect();
        let mut restored = saved;
        let second: Vec<BigUint> = (0..10).map(|_| restored.draw(13)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn skip_discards_exactly_that_many_bits() {
        // drawing k bits then n is NOT the same as skip(k) then n in the
        // buffered tail, but a skip across whole cranks must line up:
        let mut a = BlumRng::default();
        let mut b = BlumRng::default();
        a.draw(64);
        b.skip(64);
        assert_eq!(a.draw(64), b.draw(64));
    }

    #[test]
    fn pregen_selection_changes_the_stream() {
        let mut a = BlumRng::default();
        let mut b = BlumRng::default();
        a.seed2(&BigInt::zero(), &BigInt::from(1)).unwrap();
        b.seed2(&BigInt::zero(), &BigInt::from(2)).unwrap();
        assert_ne!(a.draw(64), b.draw(64));
    }

    #[test]
    fn range_rejection_stays_in_bounds() {
        let mut rng = BlumRng::default();
        let lo = BigInt::from(10);
        let hi = BigInt::from(17);
        for _ in 0..100 {
            let v = rng.range(&lo, &hi).unwrap();
            assert!(v >= lo && v < hi);
        }
    }

    #[test]
    fn additive_generator_reproduces_after_reseed() {
        let mut a = AddRand::default();
        let mut b = AddRand::default();
        a.reseed(99);
        b.reseed(99);
        assert_eq!(a.next_u64(), b.next_u64());
        assert_eq!(a.next_u64(), b.next_u64());
    }
}
