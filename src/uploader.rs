//! Inscription builder and upload HTTP surface.
//!
//! The builder takes a pre-constructed transaction (inputs already chosen
//! and signed by the caller), appends the inscription OP_RETURN as a
//! zero-value output, and optionally appends a change output whose value is
//! settled after computing `fee = serialized_size * fee_rate`. Change below
//! the dust threshold is dropped rather than created.

use {
  super::*,
  crate::server::{success, ApiError, Envelope},
  axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::post,
    Json, Router,
  },
  bitcoin::{Amount, TxOut},
  metaid::MetaIdData,
};

/// Minimum economically creatable output value, in satoshis.
pub const DUST_LIMIT: u64 = 600;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
  #[error("insufficient fee: need {need}, have {have}")]
  InsufficientFee { need: u64, have: u64 },
  #[error("invalid transaction hex: {0}")]
  InvalidTransaction(String),
  #[error("invalid change address: {0}")]
  InvalidAddress(String),
}

/// Appends the inscription output (and, when requested, a change output) to
/// a caller-supplied transaction. No partial state is written on failure.
pub fn append_inscription(
  pre_tx_hex: &str,
  data: &MetaIdData,
  change_address: Option<&str>,
  total_input_amount: u64,
  fee_rate: u64,
  chain: Chain,
) -> std::result::Result<Transaction, UploadError> {
  let bytes = hex::decode(pre_tx_hex.trim())
    .map_err(|err| UploadError::InvalidTransaction(err.to_string()))?;
  let mut tx: Transaction = consensus::deserialize(&bytes)
    .map_err(|err| UploadError::InvalidTransaction(err.to_string()))?;

  let out_amount: u64 = tx.output.iter().map(|output| output.value.to_sat()).sum();

  tx.output.push(TxOut {
    value: Amount::ZERO,
    script_pubkey: data.to_script(),
  });

  if let Some(change_address) = change_address.filter(|_| total_input_amount > 0) {
    let script_pubkey = chain
      .pay_to_address_script(change_address)
      .map_err(|err| UploadError::InvalidAddress(err.to_string()))?;

    // placeholder value; settled once the final size is known
    tx.output.push(TxOut {
      value: Amount::ZERO,
      script_pubkey,
    });

    let size = tx.total_size() as u64;
    let fee = size * fee_rate;
    let available = total_input_amount.saturating_sub(out_amount);

    if available < fee {
      return Err(UploadError::InsufficientFee {
        need: fee,
        have: available,
      });
    }

    let change = available - fee;
    if change >= DUST_LIMIT {
      tx.output
        .last_mut()
        .expect("change output pushed above")
        .value = Amount::from_sat(change);
    } else {
      tx.output.pop();
    }
  }

  Ok(tx)
}

#[derive(Clone)]
pub struct UploaderState {
  pub chain: Chain,
  pub index: Arc<Index>,
  pub rpc: RpcClient,
  pub fee_rate: u64,
  pub max_file_size: u64,
}

pub fn router(state: UploaderState) -> Router {
  let body_limit = usize::try_from(state.max_file_size).unwrap_or(usize::MAX);

  Router::new()
    .route("/api/v1/files/pre-upload", post(pre_upload))
    .route("/api/v1/files/commit-upload", post(commit_upload))
    .route("/api/v1/files/direct-upload", post(direct_upload))
    .layer(DefaultBodyLimit::max(body_limit.saturating_add(64 * 1024)))
    .with_state(state)
}

#[derive(Debug, Default)]
struct UploadForm {
  file_name: String,
  content: Vec<u8>,
  meta_id: String,
  address: String,
  path: String,
  operation: String,
  content_type: String,
  change_address: String,
  pre_tx_hex: String,
  total_input_amount: u64,
  fee_rate: u64,
}

impl UploadForm {
  async fn from_multipart(mut multipart: Multipart, max_file_size: u64) -> ApiResult<Self> {
    let mut form = Self::default();

    while let Some(field) = multipart
      .next_field()
      .await
      .map_err(|err| ApiError::InvalidParam(format!("malformed multipart body: {err}")))?
    {
      let name = field.name().unwrap_or_default().to_string();
      match name.as_str() {
        "file" => {
          form.file_name = field.file_name().unwrap_or_default().to_string();
          let data = field
            .bytes()
            .await
            .map_err(|err| ApiError::InvalidParam(format!("failed to read file field: {err}")))?;
          if data.len() as u64 > max_file_size {
            return Err(ApiError::InvalidParam(format!(
              "file exceeds the maximum upload size of {max_file_size} bytes"
            )));
          }
          form.content = data.to_vec();
        }
        other => {
          let value = field
            .text()
            .await
            .map_err(|err| ApiError::InvalidParam(format!("failed to read field `{other}`: {err}")))?;
          match other {
            "metaId" => form.meta_id = value,
            "address" => form.address = value,
            "path" => form.path = value,
            "operation" => form.operation = value,
            "contentType" => form.content_type = value,
            "changeAddress" => form.change_address = value,
            "preTxHex" => form.pre_tx_hex = value,
            "totalInputAmount" => {
              form.total_input_amount = value.parse().map_err(|_| {
                ApiError::InvalidParam("totalInputAmount must be an integer".into())
              })?
            }
            "feeRate" => {
              form.fee_rate = value
                .parse()
                .map_err(|_| ApiError::InvalidParam("feeRate must be an integer".into()))?
            }
            _ => {}
          }
        }
      }
    }

    if form.content.is_empty() {
      return Err(ApiError::InvalidParam("file content is empty".into()));
    }
    if form.path.is_empty() {
      return Err(ApiError::InvalidParam("path is required".into()));
    }
    if form.operation.is_empty() {
      form.operation = "create".into();
    }
    if form.content_type.is_empty() {
      form.content_type = "application/octet-stream".into();
    }

    Ok(form)
  }

  fn metaid_data(&self) -> MetaIdData {
    MetaIdData::new(
      self.operation.clone(),
      self.path.clone(),
      "0",
      "1.0.0",
      self.content_type.clone(),
      self.content.clone(),
    )
  }

  fn file_id(&self) -> String {
    format!("{}_{}", self.meta_id, sha256_hex(&self.content))
  }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct PreUploadResponse {
  file_id: String,
  file_md5: String,
  file_hash: String,
  tx_id: String,
  pin_id: String,
  pre_tx_raw: String,
  status: Status,
  message: String,
  cal_tx_fee: u64,
  cal_tx_size: u64,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
  file_id: String,
  status: Status,
  tx_id: String,
  pin_id: String,
  message: String,
}

#[derive(Debug, Deserialize)]
struct CommitUploadRequest {
  file_id: String,
  signed_raw_tx: String,
}

/// Builds the unsigned inscription transaction and records a pending upload
/// keyed by `file_id`. Re-submission of a known file returns its stored
/// descriptor instead of a fresh record.
async fn pre_upload(
  State(state): State<UploaderState>,
  multipart: Multipart,
) -> ApiResult<Json<Envelope<PreUploadResponse>>> {
  let form = UploadForm::from_multipart(multipart, state.max_file_size).await?;

  let unsigned = Transaction {
    version: bitcoin::transaction::Version::ONE,
    lock_time: bitcoin::absolute::LockTime::ZERO,
    input: Vec::new(),
    output: vec![TxOut {
      value: Amount::ZERO,
      script_pubkey: form.metaid_data().to_script(),
    }],
  };
  let pre_tx_raw = hex::encode(consensus::serialize(&unsigned));

  let fee_rate = if form.fee_rate > 0 {
    form.fee_rate
  } else {
    state.fee_rate
  };
  let cal_tx_size = unsigned.total_size() as u64;
  let cal_tx_fee = cal_tx_size * fee_rate;

  let file_id = form.file_id();
  let file_md5 = md5_hex(&form.content);
  let file_hash = sha256_hex(&form.content);

  if let Some(existing) = state.index.upload_file(&file_id)? {
    match existing.status {
      Status::Success => {
        return Ok(success(PreUploadResponse {
          file_id: existing.file_id,
          file_md5: existing.file_md5,
          file_hash: existing.file_hash,
          tx_id: existing.tx_id,
          pin_id: existing.pin_id,
          pre_tx_raw,
          status: Status::Success,
          message: "file already exists and uploaded".into(),
          cal_tx_fee,
          cal_tx_size,
        }));
      }
      Status::Pending => {
        return Ok(success(PreUploadResponse {
          file_id: existing.file_id,
          file_md5: existing.file_md5,
          file_hash: existing.file_hash,
          tx_id: existing.tx_id,
          pin_id: existing.pin_id,
          pre_tx_raw,
          status: Status::Pending,
          message: "file already in pending, please commit".into(),
          cal_tx_fee,
          cal_tx_size,
        }));
      }
      // a failed attempt may be superseded
      Status::Failed => {}
    }
  }

  let now = Utc::now();
  state.index.put_upload_file(&UploadFile {
    file_id: file_id.clone(),
    file_name: form.file_name.clone(),
    file_type: media::file_type(&form.content_type).into(),
    meta_id: form.meta_id.clone(),
    address: form.address.clone(),
    path: form.path.clone(),
    operation: form.operation.clone(),
    content_type: form.content_type.clone(),
    file_size: form.content.len() as u64,
    file_md5: file_md5.clone(),
    file_hash: file_hash.clone(),
    tx_id: String::new(),
    pin_id: String::new(),
    status: Status::Pending,
    created_at: now,
    updated_at: now,
  })?;

  Ok(success(PreUploadResponse {
    file_id,
    file_md5,
    file_hash,
    tx_id: String::new(),
    pin_id: String::new(),
    pre_tx_raw,
    status: Status::Pending,
    message: "success".into(),
    cal_tx_fee,
    cal_tx_size,
  }))
}

/// Broadcasts a signed transaction for a pending upload and settles the
/// record to `success`, or `failed` on a broadcast error.
async fn commit_upload(
  State(state): State<UploaderState>,
  Json(request): Json<CommitUploadRequest>,
) -> ApiResult<Json<Envelope<UploadResponse>>> {
  let record = state
    .index
    .upload_file(&request.file_id)?
    .ok_or_else(|| ApiError::NotFound(format!("upload not found: {}", request.file_id)))?;

  if record.status == Status::Success {
    return Ok(success(UploadResponse {
      file_id: record.file_id,
      status: Status::Success,
      tx_id: record.tx_id,
      pin_id: record.pin_id,
      message: "file already committed".into(),
    }));
  }

  let bytes = hex::decode(request.signed_raw_tx.trim())
    .map_err(|err| ApiError::InvalidParam(format!("invalid transaction hex: {err}")))?;
  let tx: Transaction = consensus::deserialize(&bytes)
    .map_err(|err| ApiError::InvalidParam(format!("invalid transaction: {err}")))?;
  let txid = tx.compute_txid().to_string();

  if let Err(err) = state.rpc.send_raw_transaction(&request.signed_raw_tx).await {
    state.index.fail_upload(&request.file_id)?;
    return Err(ApiError::Internal(anyhow!(
      "failed to broadcast transaction: {err}"
    )));
  }

  let pin_id = format!("{txid}i0");
  let stored = state.index.complete_upload(&request.file_id, &txid, &pin_id)?;

  Ok(success(UploadResponse {
    file_id: stored.file_id,
    status: stored.status,
    tx_id: stored.tx_id,
    pin_id: stored.pin_id,
    message: "success".into(),
  }))
}

/// One-step upload: appends the inscription and change outputs to the
/// caller's signed transaction, broadcasts, and records the result.
async fn direct_upload(
  State(state): State<UploaderState>,
  multipart: Multipart,
) -> ApiResult<Json<Envelope<UploadResponse>>> {
  let mut form = UploadForm::from_multipart(multipart, state.max_file_size).await?;

  if form.pre_tx_hex.is_empty() {
    return Err(ApiError::InvalidParam("preTxHex is required".into()));
  }
  if form.change_address.is_empty() && !form.address.is_empty() {
    form.change_address = form.address.clone();
  }

  let fee_rate = if form.fee_rate > 0 {
    form.fee_rate
  } else {
    state.fee_rate
  };

  let tx = append_inscription(
    &form.pre_tx_hex,
    &form.metaid_data(),
    (!form.change_address.is_empty()).then_some(form.change_address.as_str()),
    form.total_input_amount,
    fee_rate,
    state.chain,
  )
  .map_err(|err| match err {
    UploadError::InsufficientFee { need, have } => {
      ApiError::InvalidParam(format!("insufficient fee: need {need}, have {have}"))
    }
    other => ApiError::InvalidParam(other.to_string()),
  })?;

  let signed_raw_tx = hex::encode(consensus::serialize(&tx));
  let txid = tx.compute_txid().to_string();
  let pin_id = format!("{txid}i0");
  let file_id = form.file_id();

  if let Some(existing) = state.index.upload_file(&file_id)? {
    if existing.status == Status::Success {
      return Ok(success(UploadResponse {
        file_id: existing.file_id,
        status: Status::Success,
        tx_id: existing.tx_id,
        pin_id: existing.pin_id,
        message: "file already exists and uploaded".into(),
      }));
    }
  } else {
    let now = Utc::now();
    state.index.put_upload_file(&UploadFile {
      file_id: file_id.clone(),
      file_name: form.file_name.clone(),
      file_type: media::file_type(&form.content_type).into(),
      meta_id: form.meta_id.clone(),
      address: form.address.clone(),
      path: form.path.clone(),
      operation: form.operation.clone(),
      content_type: form.content_type.clone(),
      file_size: form.content.len() as u64,
      file_md5: md5_hex(&form.content),
      file_hash: sha256_hex(&form.content),
      tx_id: String::new(),
      pin_id: String::new(),
      status: Status::Pending,
      created_at: now,
      updated_at: now,
    })?;
  }

  if let Err(err) = state.rpc.send_raw_transaction(&signed_raw_tx).await {
    state.index.fail_upload(&file_id)?;
    return Err(ApiError::Internal(anyhow!(
      "failed to broadcast transaction: {err}"
    )));
  }

  let stored = state.index.complete_upload(&file_id, &txid, &pin_id)?;

  Ok(success(UploadResponse {
    file_id: stored.file_id,
    status: stored.status,
    tx_id: stored.tx_id,
    pin_id: stored.pin_id,
    message: "success".into(),
  }))
}

#[cfg(test)]
mod tests {
  use {
    super::*,
    bitcoin::{absolute::LockTime, transaction::Version, OutPoint, ScriptBuf, Sequence, TxIn, Witness},
  };

  fn pre_tx() -> Transaction {
    Transaction {
      version: Version::ONE,
      lock_time: LockTime::ZERO,
      input: vec![TxIn {
        previous_output: OutPoint::null(),
        script_sig: ScriptBuf::from_bytes(vec![0x00; 107]),
        sequence: Sequence::MAX,
        witness: Witness::new(),
      }],
      output: vec![TxOut {
        value: Amount::from_sat(1_000),
        script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
      }],
    }
  }

  fn pre_tx_hex() -> String {
    hex::encode(consensus::serialize(&pre_tx()))
  }

  fn inscription() -> MetaIdData {
    MetaIdData::new(
      "create",
      "/file/hello.txt",
      "0",
      "1.0.0",
      "text/plain",
      b"hello".to_vec(),
    )
  }

  const CHANGE_ADDRESS: &str = "1BitcoinEaterAddressDontSendf59kuE";

  /// Fee for the fully appended shape: inscription plus change output.
  fn fee_with_change() -> u64 {
    let mut tx = pre_tx();
    tx.output.push(TxOut {
      value: Amount::ZERO,
      script_pubkey: inscription().to_script(),
    });
    tx.output.push(TxOut {
      value: Amount::ZERO,
      script_pubkey: Chain::Mvc.pay_to_address_script(CHANGE_ADDRESS).unwrap(),
    });
    tx.total_size() as u64
  }

  #[test]
  fn inscription_output_is_appended_with_zero_value() {
    let tx = append_inscription(&pre_tx_hex(), &inscription(), None, 0, 1, Chain::Mvc).unwrap();

    assert_eq!(tx.output.len(), 2);
    assert_eq!(tx.output[1].value, Amount::ZERO);
    assert_eq!(
      metaid::MetaIdData::from_script(&tx.output[1].script_pubkey).unwrap(),
      inscription(),
    );
  }

  #[test]
  fn change_at_exactly_dust_limit_is_kept() {
    let out_amount = 1_000;
    let total_input = out_amount + fee_with_change() + DUST_LIMIT;

    let tx = append_inscription(
      &pre_tx_hex(),
      &inscription(),
      Some(CHANGE_ADDRESS),
      total_input,
      1,
      Chain::Mvc,
    )
    .unwrap();

    assert_eq!(tx.output.len(), 3);
    assert_eq!(tx.output[2].value, Amount::from_sat(DUST_LIMIT));
  }

  #[test]
  fn change_below_dust_limit_is_dropped() {
    let out_amount = 1_000;
    let total_input = out_amount + fee_with_change() + DUST_LIMIT - 1;

    let tx = append_inscription(
      &pre_tx_hex(),
      &inscription(),
      Some(CHANGE_ADDRESS),
      total_input,
      1,
      Chain::Mvc,
    )
    .unwrap();

    // inscription kept, change dropped
    assert_eq!(tx.output.len(), 2);
    assert!(metaid::MetaIdData::from_script(&tx.output[1].script_pubkey).is_some());
  }

  #[test]
  fn insufficient_fee_is_a_typed_error() {
    let out_amount = 1_000;
    let total_input = out_amount + fee_with_change() - 1;

    let result = append_inscription(
      &pre_tx_hex(),
      &inscription(),
      Some(CHANGE_ADDRESS),
      total_input,
      1,
      Chain::Mvc,
    );

    assert!(matches!(result, Err(UploadError::InsufficientFee { .. })));
  }

  #[test]
  fn fee_scales_with_fee_rate() {
    let out_amount = 1_000;
    // enough at rate 1, not at rate 10
    let total_input = out_amount + fee_with_change() + DUST_LIMIT;

    assert!(append_inscription(
      &pre_tx_hex(),
      &inscription(),
      Some(CHANGE_ADDRESS),
      total_input,
      10,
      Chain::Mvc,
    )
    .is_err());
  }

  #[test]
  fn garbage_hex_is_rejected() {
    assert!(matches!(
      append_inscription("zz", &inscription(), None, 0, 1, Chain::Mvc),
      Err(UploadError::InvalidTransaction(_)),
    ));
  }
}
