//! 戦闘の中断セーブ/再開。
//!
//! ## バージョニング方針
//!
//! - `SAVE_VERSION`: 現在のセーブ形式バージョン。フィールド追加時にインクリメントする。
//! - `MIN_COMPATIBLE_VERSION`: これ未満のデータは破棄して新規戦闘にする。
//!
//! 復元時の整合性チェックは `Battle::restore` と `GameStateManager::restore` が行う。

use serde::{Deserialize, Serialize};

use super::error::{ErrorKind, GameError, GameResult};
use super::turn::GameState;
use super::unit::UnitId;
use super::victory::StagePerformance;

#[cfg(target_arch = "wasm32")]
use super::battle::Battle;

/// セーブデータのフォーマットバージョン。
pub const SAVE_VERSION: u32 = 1;

/// 互換性を維持できる最小バージョン。
const MIN_COMPATIBLE_VERSION: u32 = 1;

/// localStorage のキー。
#[cfg(target_arch = "wasm32")]
const STORAGE_KEY: &str = "rose_tactics_battle";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BattleSnapshot {
    pub version: u32,
    pub stage_id: String,
    /// ターン順・ユニット配列を含む状態一式。
    pub state: GameState,
    #[serde(default)]
    pub performance: StagePerformance,
    #[serde(default)]
    pub defeated_bosses: Vec<UnitId>,
}

impl BattleSnapshot {
    pub fn capture(
        stage_id: &str,
        state: GameState,
        performance: StagePerformance,
        defeated_bosses: Vec<UnitId>,
    ) -> Self {
        Self { version: SAVE_VERSION, stage_id: stage_id.to_string(), state, performance, defeated_bosses }
    }

    pub fn to_json(&self) -> GameResult<String> {
        serde_json::to_string(self).map_err(|e| {
            GameError::new(ErrorKind::InvalidStageData, "snapshot could not be serialized").with_details(e.to_string())
        })
    }

    /// パースとバージョン確認のみ。中身の検証は復元側で行う。
    pub fn from_json(json: &str) -> GameResult<Self> {
        let snapshot: BattleSnapshot = serde_json::from_str(json).map_err(|e| {
            GameError::new(ErrorKind::InvalidStageData, "snapshot could not be parsed").with_details(e.to_string())
        })?;
        if snapshot.version < MIN_COMPATIBLE_VERSION || snapshot.version > SAVE_VERSION {
            return Err(GameError::new(
                ErrorKind::InvalidStageData,
                format!(
                    "unsupported save version {} (supported {MIN_COMPATIBLE_VERSION}..={SAVE_VERSION})",
                    snapshot.version
                ),
            ));
        }
        Ok(snapshot)
    }
}

/// localStorage にアクセスする。WASM 環境でのみ動作。
#[cfg(target_arch = "wasm32")]
fn get_storage() -> Option<web_sys::Storage> {
    web_sys::window()?.local_storage().ok()?
}

/// 戦闘を localStorage に保存する。終了した戦闘はセーブを消す。
#[cfg(target_arch = "wasm32")]
pub fn save_battle(battle: &Battle) {
    let Some(storage) = get_storage() else {
        return;
    };
    if battle.gsm().is_game_over() {
        let _ = storage.remove_item(STORAGE_KEY);
        return;
    }
    let json = match battle.snapshot().to_json() {
        Ok(j) => j,
        Err(e) => {
            web_sys::console::warn_1(&format!("Rose Tactics: セーブのシリアライズに失敗: {e}").into());
            return;
        }
    };
    if let Err(e) = storage.set_item(STORAGE_KEY, &json) {
        web_sys::console::warn_1(&format!("Rose Tactics: localStorage への保存に失敗: {e:?}").into());
    }
}

/// localStorage から戦闘を再開する。壊れたデータは削除して false を返す。
#[cfg(target_arch = "wasm32")]
pub fn load_battle(battle: &mut Battle) -> bool {
    let Some(storage) = get_storage() else {
        return false;
    };
    let json = match storage.get_item(STORAGE_KEY) {
        Ok(Some(j)) => j,
        _ => return false,
    };
    let restored = BattleSnapshot::from_json(&json).and_then(|snapshot| battle.restore(snapshot));
    match restored {
        Ok(()) => true,
        Err(e) => {
            web_sys::console::warn_1(&format!("Rose Tactics: セーブデータを破棄します: {e}").into());
            let _ = storage.remove_item(STORAGE_KEY);
            false
        }
    }
}
