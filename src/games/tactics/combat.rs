//! Damage, healing and skill effect resolution.
//!
//! `check_*` functions are read-only. `apply_*` functions assume the matching
//! check passed and only fail if a unit vanished in between.

use super::error::{GameError, GameResult};
use super::events::BattleEvent;
use super::skills::{SkillDef, SkillKind, SkillTarget};
use super::turn::GameStateManager;
use super::unit::{ActiveSkillEffect, EffectType, Faction, Unit, UnitId};

/// What one attack or cast did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CombatReport {
    pub actor: UnitId,
    pub actor_faction: Option<Faction>,
    pub target: UnitId,
    pub damage: u32,
    pub healed: u32,
    pub effect: Option<EffectType>,
    pub defeated: bool,
}

// ── Formulas ──────────────────────────────────────────────────

pub fn physical_damage(attacker: &Unit, defender: &Unit) -> u32 {
    (attacker.stats.attack - defender.stats.defense / 2).max(1) as u32
}

pub fn skill_damage(attacker: &Unit, defender: &Unit, power: i32) -> u32 {
    (attacker.stats.attack * power / 100 - defender.stats.defense / 2).max(1) as u32
}

pub fn heal_amount(caster: &Unit, power: i32) -> u32 {
    (caster.stats.attack * power / 100).max(0) as u32
}

// ── Validation ────────────────────────────────────────────────

fn pair<'a>(gsm: &'a GameStateManager, actor: &str, target: &str) -> GameResult<(&'a Unit, &'a Unit)> {
    let a = gsm.unit(actor).ok_or_else(|| GameError::unit_not_found(actor))?;
    let t = gsm.unit(target).ok_or_else(|| GameError::unit_not_found(target))?;
    if gsm.is_game_over() {
        return Err(GameError::invalid_turn_state("the game has already ended"));
    }
    if !a.is_alive() || !t.is_alive() {
        return Err(GameError::invalid_action("defeated units cannot take part"));
    }
    if a.has_acted {
        return Err(GameError::invalid_action(format!("{} has already acted", a.name)));
    }
    if a.faction != gsm.state().active_player {
        return Err(GameError::invalid_action(format!("it is not {}'s turn", a.name)));
    }
    Ok((a, t))
}

pub fn check_attack(gsm: &GameStateManager, attacker: &str, target: &str) -> GameResult<()> {
    let (a, t) = pair(gsm, attacker, target)?;
    if a.faction == t.faction {
        return Err(GameError::invalid_action(format!("{} is an ally", t.name)));
    }
    if a.position.manhattan(t.position) != 1 {
        return Err(GameError::invalid_action(format!("{} is not adjacent", t.name)));
    }
    Ok(())
}

pub fn check_skill(gsm: &GameStateManager, caster: &str, target: &str, skill: &SkillDef) -> GameResult<()> {
    let (c, t) = pair(gsm, caster, target)?;
    let ok = match skill.target {
        SkillTarget::Enemy => c.faction != t.faction,
        SkillTarget::Ally => c.faction == t.faction,
        SkillTarget::SelfOnly => c.id == t.id,
    };
    if !ok {
        return Err(GameError::invalid_action(format!("{} cannot target {}", skill.name, t.name)));
    }
    if c.position.manhattan(t.position) > skill.range {
        return Err(GameError::invalid_action(format!("{} is out of range", t.name)));
    }
    Ok(())
}

// ── Resolution ────────────────────────────────────────────────

fn deal_damage(gsm: &mut GameStateManager, target: &str, amount: u32) -> GameResult<(u32, bool)> {
    let unit = gsm.unit_mut(target).ok_or_else(|| GameError::unit_not_found(target))?;
    let dealt = unit.take_damage(amount);
    Ok((dealt, !unit.is_alive()))
}

pub fn apply_attack(gsm: &mut GameStateManager, attacker: &str, target: &str) -> GameResult<CombatReport> {
    let (a, t) = pair_unchecked(gsm, attacker, target)?;
    let amount = physical_damage(a, t);
    let actor_faction = Some(a.faction);
    let (damage, defeated) = deal_damage(gsm, target, amount)?;
    gsm.events().emit(BattleEvent::UnitUpdated { unit: target.to_string() });
    Ok(CombatReport {
        actor: attacker.to_string(),
        actor_faction,
        target: target.to_string(),
        damage,
        defeated,
        ..CombatReport::default()
    })
}

pub fn apply_skill(
    gsm: &mut GameStateManager,
    caster: &str,
    target: &str,
    skill: &SkillDef,
) -> GameResult<CombatReport> {
    let (c, t) = pair_unchecked(gsm, caster, target)?;
    let mut report = CombatReport {
        actor: caster.to_string(),
        actor_faction: Some(c.faction),
        target: target.to_string(),
        ..CombatReport::default()
    };
    match skill.kind {
        SkillKind::Damage { power } => {
            let amount = skill_damage(c, t, power);
            let (damage, defeated) = deal_damage(gsm, target, amount)?;
            report.damage = damage;
            report.defeated = defeated;
        }
        SkillKind::Heal { power } => {
            let amount = heal_amount(c, power);
            let unit = gsm.unit_mut(target).ok_or_else(|| GameError::unit_not_found(target))?;
            report.healed = unit.heal(amount);
        }
        SkillKind::Effect { effect_type, value, duration } => {
            let effect = ActiveSkillEffect {
                effect_id: format!("{}@{}#{}", skill.id, caster, gsm.state().current_turn),
                effect_type,
                source_skill_id: skill.id.to_string(),
                remaining_duration: duration,
                value,
            };
            gsm.apply_effect(target, effect)?;
            report.effect = Some(effect_type);
        }
    }
    gsm.events().emit(BattleEvent::UnitUpdated { unit: target.to_string() });
    Ok(report)
}

fn pair_unchecked<'a>(gsm: &'a GameStateManager, actor: &str, target: &str) -> GameResult<(&'a Unit, &'a Unit)> {
    let a = gsm.unit(actor).ok_or_else(|| GameError::unit_not_found(actor))?;
    let t = gsm.unit(target).ok_or_else(|| GameError::unit_not_found(target))?;
    Ok((a, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::tactics::error::ErrorKind;
    use crate::games::tactics::events::EventBus;
    use crate::games::tactics::skills;
    use crate::games::tactics::unit::{test_unit, Position};

    fn at(mut unit: Unit, x: i32, y: i32) -> Unit {
        unit.position = Position::new(x, y);
        unit
    }

    fn duel() -> GameStateManager {
        let mut gsm = GameStateManager::new(EventBus::new());
        gsm.initialize_turn_order(vec![
            at(test_unit("hero", Faction::Player, 9).with_skills(["fire_bolt", "heal", "guard"]), 0, 0),
            at(test_unit("orc", Faction::Enemy, 5), 1, 0),
            at(test_unit("mage", Faction::Player, 3), 0, 3),
        ])
        .unwrap();
        gsm
    }

    #[test]
    fn formulas() {
        let mut a = test_unit("a", Faction::Player, 1);
        let d = test_unit("d", Faction::Enemy, 1);
        assert_eq!(physical_damage(&a, &d), 8);
        assert_eq!(skill_damage(&a, &d, 150), 13);
        assert_eq!(heal_amount(&a, 100), 10);
        a.stats.attack = 1;
        assert_eq!(physical_damage(&a, &d), 1);
        assert_eq!(skill_damage(&a, &d, 50), 1);
    }

    #[test]
    fn attack_requires_adjacent_foe() {
        let gsm = duel();
        check_attack(&gsm, "hero", "orc").unwrap();
        let err = check_attack(&gsm, "hero", "mage").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidAction);
        let err = check_attack(&gsm, "orc", "hero").unwrap_err();
        assert!(err.message.contains("turn"));
        assert_eq!(check_attack(&gsm, "hero", "ghost").unwrap_err().kind, ErrorKind::UnitNotFound);
    }

    #[test]
    fn attack_damages_target() {
        let mut gsm = duel();
        let report = apply_attack(&mut gsm, "hero", "orc").unwrap();
        assert_eq!(report.damage, 8);
        assert!(!report.defeated);
        assert_eq!(gsm.unit("orc").unwrap().current_hp, 22);
    }

    #[test]
    fn lethal_attack_reports_defeat() {
        let mut gsm = duel();
        gsm.unit_mut("orc").unwrap().current_hp = 3;
        let report = apply_attack(&mut gsm, "hero", "orc").unwrap();
        assert_eq!(report.damage, 3);
        assert!(report.defeated);
    }

    #[test]
    fn skill_targets_are_checked() {
        let gsm = duel();
        let heal = skills::find("heal").unwrap();
        assert!(check_skill(&gsm, "hero", "orc", heal).is_err());
        assert!(check_skill(&gsm, "hero", "mage", heal).is_err()); // range 2, distance 3
        let guard = skills::find("guard").unwrap();
        check_skill(&gsm, "hero", "hero", guard).unwrap();
        assert!(check_skill(&gsm, "hero", "mage", guard).is_err());
    }

    #[test]
    fn heal_and_buff_resolution() {
        let mut gsm = duel();
        gsm.unit_mut("hero").unwrap().current_hp = 25;
        let report = apply_skill(&mut gsm, "hero", "hero", skills::find("heal").unwrap()).unwrap();
        assert_eq!(report.healed, 5);

        let report = apply_skill(&mut gsm, "hero", "hero", skills::find("guard").unwrap()).unwrap();
        assert_eq!(report.effect, Some(EffectType::DefenseUp));
        assert_eq!(gsm.unit("hero").unwrap().stats.defense, 8);
    }
}
