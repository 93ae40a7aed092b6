//! MetaID inscription envelopes.
//!
//! A MetaID inscription is an unspendable output whose script is
//!
//! ```text
//! OP_0 OP_RETURN <"metaid"> <operation> <path> <encryption> <version> <content-type> <chunk>*
//! ```
//!
//! where the trailing data pushes, concatenated in order, form the payload
//! content. This crate recognises and decodes such scripts, and builds them
//! back from structured values, chunking content at 520 bytes per push.

use {
  bitcoin::{
    blockdata::opcodes::all::OP_RETURN,
    script::{Builder, Instruction, PushBytesBuf, Script, ScriptBuf},
    Transaction,
  },
  serde::{Deserialize, Serialize},
  std::fmt::{self, Display, Formatter},
};

/// Protocol identifier, the first data push of every inscription.
pub const PROTOCOL_ID: [u8; 6] = *b"metaid";

/// Maximum payload bytes per content push. All content pushes except the
/// last are exactly this size.
pub const MAX_CHUNK_SIZE: usize = 520;

/// A decoded MetaID payload.
///
/// `parent_path` is not carried on the wire; it is derived from `path` by
/// truncating at the last `/`, both when decoding and when constructing a
/// value with [`MetaIdData::new`], so the encode/decode round trip is exact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaIdData {
  pub operation: String,
  pub path: String,
  pub encryption: String,
  pub version: String,
  pub content_type: String,
  pub content: Vec<u8>,
  pub parent_path: String,
}

impl MetaIdData {
  pub fn new(
    operation: impl Into<String>,
    path: impl Into<String>,
    encryption: impl Into<String>,
    version: impl Into<String>,
    content_type: impl Into<String>,
    content: Vec<u8>,
  ) -> Self {
    let path = path.into();
    Self {
      operation: operation.into(),
      parent_path: parent_path(&path),
      path,
      encryption: encryption.into(),
      version: version.into(),
      content_type: content_type.into(),
      content,
    }
  }

  /// Builds the inscription script for this payload.
  pub fn to_script(&self) -> ScriptBuf {
    let mut builder = Builder::new()
      .push_slice([])
      .push_opcode(OP_RETURN)
      .push_slice(PROTOCOL_ID)
      .push_slice(push_bytes(self.operation.as_bytes()))
      .push_slice(push_bytes(self.path.as_bytes()))
      .push_slice(push_bytes(self.encryption.as_bytes()))
      .push_slice(push_bytes(self.version.as_bytes()))
      .push_slice(push_bytes(self.content_type.as_bytes()));

    for chunk in self.content.chunks(MAX_CHUNK_SIZE) {
      builder = builder.push_slice(push_bytes(chunk));
    }

    builder.into_script()
  }

  /// Recognises and decodes an inscription script. Returns `None` for any
  /// script that is not a MetaID inscription: wrong prefix, fewer than six
  /// metadata pushes, or a non-push opcode after the `OP_RETURN`.
  pub fn from_script(script: &Script) -> Option<Self> {
    let mut instructions = script.instructions();

    // OP_0 is the empty push
    match instructions.next()? {
      Ok(Instruction::PushBytes(push)) if push.is_empty() => {}
      _ => return None,
    }

    match instructions.next()? {
      Ok(Instruction::Op(op)) if op == OP_RETURN => {}
      _ => return None,
    }

    let mut pushes = Vec::new();
    for instruction in instructions {
      match instruction {
        Ok(Instruction::PushBytes(push)) => pushes.push(push.as_bytes().to_vec()),
        _ => return None,
      }
    }

    if pushes.len() < 6 || pushes[0] != PROTOCOL_ID {
      return None;
    }

    let mut content = Vec::new();
    for chunk in &pushes[6..] {
      content.extend_from_slice(chunk);
    }

    Some(MetaIdData::new(
      String::from_utf8_lossy(&pushes[1]).into_owned(),
      String::from_utf8_lossy(&pushes[2]).into_owned(),
      String::from_utf8_lossy(&pushes[3]).into_owned(),
      String::from_utf8_lossy(&pushes[4]).into_owned(),
      String::from_utf8_lossy(&pushes[5]).into_owned(),
      content,
    ))
  }
}

/// One inscription found in a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
  pub txid: bitcoin::Txid,
  pub vout: u32,
  pub data: MetaIdData,
  /// `txid:vout` of the transaction's first non-coinbase input, whose
  /// previous output's address is the authoritative creator.
  pub creator_input_location: Option<String>,
}

impl Pin {
  /// The canonical PIN identifier, `txid + "i" + vout`.
  pub fn id(&self) -> String {
    format!("{}i{}", self.txid, self.vout)
  }
}

impl Display for Pin {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    write!(f, "{}i{}", self.txid, self.vout)
  }
}

/// Extracts every inscription carried by `tx`, in output order. The PIN
/// vout index equals the output's position. Outputs that are not MetaID
/// inscriptions are skipped silently.
pub fn pins_in_transaction(tx: &Transaction) -> Vec<Pin> {
  let txid = tx.compute_txid();

  let creator_input_location = tx
    .input
    .first()
    .filter(|input| !input.previous_output.is_null())
    .map(|input| {
      format!(
        "{}:{}",
        input.previous_output.txid, input.previous_output.vout
      )
    });

  tx.output
    .iter()
    .enumerate()
    .filter_map(|(vout, output)| {
      MetaIdData::from_script(&output.script_pubkey).map(|data| Pin {
        txid,
        vout: vout as u32,
        data,
        creator_input_location: creator_input_location.clone(),
      })
    })
    .collect()
}

fn parent_path(path: &str) -> String {
  match path.rfind('/') {
    Some(0) | None => String::new(),
    Some(index) => path[..index].to_string(),
  }
}

fn push_bytes(bytes: &[u8]) -> PushBytesBuf {
  PushBytesBuf::try_from(bytes.to_vec()).expect("pushes are far below the 4 GiB limit")
}
