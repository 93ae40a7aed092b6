use {
  super::*,
  bitcoin::{
    blockdata::opcodes::all::{OP_CHECKSIG, OP_DUP, OP_EQUAL, OP_EQUALVERIFY, OP_HASH160},
    script::{Builder, Script, ScriptBuf},
  },
  clap::ValueEnum,
};

#[derive(Default, ValueEnum, Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Chain {
  #[default]
  Mvc,
  MvcTestnet,
  Btc,
  BtcTestnet,
}

impl Chain {
  /// Chain name as recorded on indexed entities, without the network
  /// qualifier.
  pub fn name(self) -> &'static str {
    match self {
      Self::Mvc | Self::MvcTestnet => "mvc",
      Self::Btc | Self::BtcTestnet => "btc",
    }
  }

  pub fn is_mainnet(self) -> bool {
    matches!(self, Self::Mvc | Self::Btc)
  }

  fn p2pkh_version(self) -> u8 {
    // MVC keeps the BSV-lineage legacy version bytes, which match Bitcoin's
    if self.is_mainnet() {
      0x00
    } else {
      0x6f
    }
  }

  fn p2sh_version(self) -> u8 {
    if self.is_mainnet() {
      0x05
    } else {
      0xc4
    }
  }

  /// Returns the base58check address string for a P2PKH or P2SH locking
  /// script, `None` for any other script shape.
  pub fn address_from_script(self, script: &Script) -> Option<String> {
    let bytes = script.as_bytes();
    if script.is_p2pkh() && bytes.len() == 25 {
      // OP_DUP OP_HASH160 <20-byte-hash> OP_EQUALVERIFY OP_CHECKSIG
      Some(base58check(self.p2pkh_version(), &bytes[3..23]))
    } else if script.is_p2sh() && bytes.len() == 23 {
      // OP_HASH160 <20-byte-hash> OP_EQUAL
      Some(base58check(self.p2sh_version(), &bytes[2..22]))
    } else {
      None
    }
  }

  /// Builds the locking script paying to a base58check address.
  pub fn pay_to_address_script(self, address: &str) -> Result<ScriptBuf> {
    let decoded = bitcoin::base58::decode_check(address)
      .with_context(|| format!("invalid address `{address}`"))?;

    let (version, hash) = decoded
      .split_first()
      .ok_or_else(|| anyhow!("empty address payload for `{address}`"))?;

    if hash.len() != 20 {
      bail!("invalid address payload length for `{address}`");
    }

    let hash: [u8; 20] = hash.try_into().expect("length checked above");

    if *version == self.p2pkh_version() {
      Ok(
        Builder::new()
          .push_opcode(OP_DUP)
          .push_opcode(OP_HASH160)
          .push_slice(hash)
          .push_opcode(OP_EQUALVERIFY)
          .push_opcode(OP_CHECKSIG)
          .into_script(),
      )
    } else if *version == self.p2sh_version() {
      Ok(
        Builder::new()
          .push_opcode(OP_HASH160)
          .push_slice(hash)
          .push_opcode(OP_EQUAL)
          .into_script(),
      )
    } else {
      bail!("address `{address}` does not belong to chain `{self}`")
    }
  }
}

fn base58check(version: u8, payload: &[u8]) -> String {
  let mut data = Vec::with_capacity(1 + payload.len());
  data.push(version);
  data.extend_from_slice(payload);
  bitcoin::base58::encode_check(&data)
}

impl Display for Chain {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    write!(
      f,
      "{}",
      match self {
        Self::Mvc => "mvc",
        Self::MvcTestnet => "mvc-testnet",
        Self::Btc => "btc",
        Self::BtcTestnet => "btc-testnet",
      }
    )
  }
}

impl FromStr for Chain {
  type Err = anyhow::Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "mvc" | "mainnet" => Ok(Self::Mvc),
      "mvc-testnet" | "testnet" => Ok(Self::MvcTestnet),
      "btc" => Ok(Self::Btc),
      "btc-testnet" => Ok(Self::BtcTestnet),
      _ => bail!("invalid chain `{s}`"),
    }
  }
}
