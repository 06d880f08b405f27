//! End-to-end rule journeys: independent features contributing to shared
//! combat occurrences without knowing about each other.

use crate::{
    Bus, ChainedTopic, ChainedTopicDef, Context, DeferredAction, Duration, EventContext, Modifier,
    ModifierKind, ModifierValue, Result, Stage, SubscribeOptions, SubscriptionId, TopicDef,
    TopicRegistry, TypedKey,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone)]
struct AttackEvent {
    attacker: &'static str,
    target: &'static str,
    damage: i32,
}

#[derive(Debug, Clone)]
struct SaveEvent {
    target: &'static str,
    dc: i32,
    base_roll: i32,
    total_roll: i32,
}

#[derive(Debug, Clone)]
struct DamageEvent {
    target: &'static str,
    amount: i32,
    damage_type: &'static str,
}

#[derive(Debug, Clone)]
struct TurnStarted {
    combatant: &'static str,
    round: u32,
}

fn combat_stages() -> Vec<Stage> {
    ["base", "features", "conditions", "equipment", "final"]
        .into_iter()
        .map(Stage::new)
        .collect()
}

struct Rage {
    owner: &'static str,
    bonus: i32,
}

impl Rage {
    fn apply(&self, attacks: &ChainedTopic<AttackEvent>, ctx: &Context) -> Result<SubscriptionId> {
        let (owner, bonus) = (self.owner, self.bonus);
        attacks.subscribe_with_chain(ctx, move |_, event, chain| {
            if event.attacker == owner {
                chain.add("features", "rage", move |_, mut attack: AttackEvent| {
                    attack.damage += bonus;
                    Ok(attack)
                })?;
            }
            Ok(())
        })
    }
}

struct Bless {
    targets: Vec<&'static str>,
    bonus: i32,
}

impl Bless {
    fn apply(&self, attacks: &ChainedTopic<AttackEvent>, ctx: &Context) -> Result<SubscriptionId> {
        let (targets, bonus) = (self.targets.clone(), self.bonus);
        attacks.subscribe_with_chain(ctx, move |_, event, chain| {
            if targets.contains(&event.attacker) {
                chain.add("conditions", "bless", move |_, mut attack: AttackEvent| {
                    attack.damage += bonus;
                    Ok(attack)
                })?;
            }
            Ok(())
        })
    }
}

struct MagicWeapon {
    owner: &'static str,
    bonus: i32,
}

impl MagicWeapon {
    fn apply(&self, attacks: &ChainedTopic<AttackEvent>, ctx: &Context) -> Result<SubscriptionId> {
        let (owner, bonus) = (self.owner, self.bonus);
        attacks.subscribe_with_chain(ctx, move |_, event, chain| {
            if event.attacker == owner {
                chain.add("equipment", "magic-weapon", move |_, mut attack: AttackEvent| {
                    attack.damage += bonus;
                    Ok(attack)
                })?;
            }
            Ok(())
        })
    }
}

#[test_log::test]
fn test_attack_journey_collects_features_conditions_and_equipment() {
    let registry = TopicRegistry::new();
    let attacks_def =
        ChainedTopicDef::<AttackEvent>::define_in(&registry, "combat.attack", combat_stages())
            .unwrap();
    let bus = Bus::new();
    let ctx = Context::new();
    let attacks = attacks_def.on(&bus);

    // registered in an order unrelated to stage order
    MagicWeapon { owner: "barbarian", bonus: 1 }.apply(&attacks, &ctx).unwrap();
    Bless { targets: vec!["barbarian"], bonus: 4 }.apply(&attacks, &ctx).unwrap();
    Rage { owner: "barbarian", bonus: 2 }.apply(&attacks, &ctx).unwrap();

    let attack = AttackEvent {
        attacker: "barbarian",
        target: "goblin",
        damage: 10,
    };
    let chain = attacks
        .publish_with_chain(&ctx, &attack, attacks.new_chain())
        .unwrap();
    let result = chain.execute(&ctx, attack.clone()).unwrap();

    assert_eq!(chain.len(), 3);
    assert_eq!(result.damage, 17);
    assert_eq!(result.target, "goblin");
    assert_eq!(attack.damage, 10);

    let wizard = AttackEvent {
        attacker: "wizard",
        target: "goblin",
        damage: 6,
    };
    let chain = attacks
        .publish_with_chain(&ctx, &wizard, attacks.new_chain())
        .unwrap();
    assert!(chain.is_empty());
    assert_eq!(chain.execute(&ctx, wizard).unwrap().damage, 6);
}

#[test]
fn test_save_journey() {
    let registry = TopicRegistry::new();
    let saves_def = ChainedTopicDef::<SaveEvent>::define_in(
        &registry,
        "combat.save",
        ["base", "features", "conditions"].map(Stage::new),
    )
    .unwrap();
    let bus = Bus::new();
    let ctx = Context::new();
    let saves = saves_def.on(&bus);

    saves
        .subscribe_with_chain(&ctx, |_, event, chain| {
            if event.target == "hero" {
                chain.add("features", "resistance", |_, mut save: SaveEvent| {
                    save.total_roll += 5;
                    Ok(save)
                })?;
            }
            Ok(())
        })
        .unwrap();
    saves
        .subscribe_with_chain(&ctx, |_, _, chain| {
            chain.add("conditions", "bane", |_, mut save: SaveEvent| {
                save.total_roll -= 2;
                Ok(save)
            })?;
            chain.add("base", "roll", |_, mut save: SaveEvent| {
                save.total_roll = save.base_roll;
                Ok(save)
            })?;
            Ok(())
        })
        .unwrap();

    let save = SaveEvent {
        target: "hero",
        dc: 15,
        base_roll: 10,
        total_roll: 0,
    };
    let chain = saves.publish_with_chain(&ctx, &save, saves.new_chain()).unwrap();
    let result = chain.execute(&ctx, save.clone()).unwrap();

    assert_eq!(result.total_roll, 13);
    assert!(result.total_roll < save.dc);
}

#[test]
fn test_damage_reduction_by_type() {
    let registry = TopicRegistry::new();
    let damage_def = ChainedTopicDef::<DamageEvent>::define_in(
        &registry,
        "combat.damage",
        ["base", "conditions", "final"].map(Stage::new),
    )
    .unwrap();
    let bus = Bus::new();
    let ctx = Context::new();
    let damages = damage_def.on(&bus);

    damages
        .subscribe_with_chain(&ctx, |_, event, chain| {
            if event.target == "dragon" && event.damage_type == "fire" {
                chain.add("conditions", "fire-resistance", |_, mut damage: DamageEvent| {
                    damage.amount /= 2;
                    Ok(damage)
                })?;
            }
            Ok(())
        })
        .unwrap();
    damages
        .subscribe_with_chain(&ctx, |_, event, chain| {
            if event.target == "dragon" {
                chain.add("final", "stoneskin", |_, mut damage: DamageEvent| {
                    damage.amount = (damage.amount - 3).max(0);
                    Ok(damage)
                })?;
            }
            Ok(())
        })
        .unwrap();

    let fire = DamageEvent {
        target: "dragon",
        amount: 20,
        damage_type: "fire",
    };
    let slash = DamageEvent {
        target: "dragon",
        amount: 15,
        damage_type: "slashing",
    };

    let fire_chain = damages.publish_with_chain(&ctx, &fire, damages.new_chain()).unwrap();
    let slash_chain = damages.publish_with_chain(&ctx, &slash, damages.new_chain()).unwrap();

    assert_eq!(fire_chain.execute(&ctx, fire).unwrap().amount, 7);
    assert_eq!(slash_chain.execute(&ctx, slash).unwrap().amount, 12);
}

#[test]
fn test_condition_expires_after_its_duration() {
    let registry = TopicRegistry::new();
    let turns = TopicDef::<TurnStarted>::define_in(&registry, "combat.turn_started").unwrap();
    let bus = Bus::new();
    let ctx = Context::new();
    let ticks = Arc::new(AtomicU32::new(0));
    let own_id: Arc<OnceLock<SubscriptionId>> = Arc::default();

    // poisoned for two rounds, starting on the rogue's first turn
    let poison = Duration::rounds(2, 1);
    let (tick_count, handler_id) = (Arc::clone(&ticks), Arc::clone(&own_id));
    let id = turns
        .on(&bus)
        .subscribe_deferred(&ctx, SubscribeOptions::new(), move |_, turn| {
            if turn.combatant != "rogue" {
                return Ok(DeferredAction::none());
            }
            if poison.is_expired(turn.round, std::time::Duration::ZERO) {
                let mut action = DeferredAction::none();
                if let Some(id) = handler_id.get() {
                    action = action.unsubscribe(*id);
                }
                return Ok(action);
            }
            tick_count.fetch_add(1, Ordering::SeqCst);
            Ok(DeferredAction::none())
        })
        .unwrap();
    own_id.set(id).unwrap();

    for round in 1..=4 {
        for combatant in ["rogue", "ogre"] {
            turns
                .on(&bus)
                .publish(&ctx, TurnStarted { combatant, round })
                .unwrap();
        }
    }

    assert_eq!(ticks.load(Ordering::SeqCst), 2);
    assert!(!bus.has_subscribers("combat.turn_started"));
}

#[test]
fn test_handlers_record_modifiers_on_the_event_context() {
    let registry = TopicRegistry::new();
    let attacks = TopicDef::<AttackEvent>::define_in(&registry, "combat.attack_roll").unwrap();
    let bus = Bus::new();
    let ctx = Context::new();
    let proficiency = TypedKey::<i32>::new("proficiency");

    let key = proficiency.clone();
    bus.subscribe(
        &ctx,
        attacks.topic().clone(),
        crate::Handler::event(move |event| {
            if let Some(event_ctx) = event.context_mut() {
                let bonus = event_ctx.get(&key).copied().unwrap_or(0);
                event_ctx.add_modifier(Modifier::additive("proficiency", "attack_roll", 0, bonus));
            }
            Ok(DeferredAction::none())
        }),
        SubscribeOptions::new().priority(0),
    )
    .unwrap();
    bus.subscribe(
        &ctx,
        attacks.topic().clone(),
        crate::Handler::event(|event| {
            if let Some(event_ctx) = event.context_mut() {
                event_ctx.add_modifier(Modifier::new(
                    "bless",
                    ModifierKind::Additive,
                    "attack_roll",
                    10,
                    ModifierValue::Raw {
                        value: 4,
                        source: "bless".into(),
                    },
                ));
                event_ctx.add_modifier(Modifier::new(
                    "reckless",
                    ModifierKind::Flag,
                    "advantage",
                    0,
                    ModifierValue::Flag(true),
                ));
            }
            Ok(DeferredAction::none())
        }),
        SubscribeOptions::new().priority(5),
    )
    .unwrap();

    let mut envelope = attacks.envelope(AttackEvent {
        attacker: "barbarian",
        target: "goblin",
        damage: 0,
    });
    envelope.event_context_mut().set(&proficiency, 2);
    attacks.on(&bus).publish_envelope(&ctx, &mut envelope).unwrap();

    let context: &EventContext = envelope.event_context();
    let rolled: i32 = context
        .modifiers_for("attack_roll")
        .iter()
        .filter_map(|m| m.value.as_int())
        .sum();
    let descriptions: Vec<String> = context
        .modifiers_for("attack_roll")
        .iter()
        .map(|m| m.value.description())
        .collect();

    assert_eq!(rolled, 6);
    assert_eq!(descriptions, vec!["+2 (proficiency)", "+4 (bless)"]);
    assert_eq!(context.modifiers_for("advantage").len(), 1);
}

#[test]
fn test_cascading_reactions_stay_within_depth() {
    let registry = TopicRegistry::new();
    let damage = TopicDef::<DamageEvent>::define_in(&registry, "combat.damage_dealt").unwrap();
    let bus = Bus::with_max_depth(3);
    let ctx = Context::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    // fire shield reflects half of any melee damage back at the attacker
    let reflect = damage.clone();
    let seen = Arc::clone(&log);
    damage
        .on(&bus)
        .subscribe_deferred(&ctx, SubscribeOptions::new(), move |_, hit| {
            seen.lock().push((hit.target, hit.amount));
            let mut action = DeferredAction::none();
            if hit.amount > 1 {
                let back_at = if hit.target == "fire-giant" { "fighter" } else { "fire-giant" };
                action = action.publish(reflect.event(DamageEvent {
                    target: back_at,
                    amount: hit.amount / 2,
                    damage_type: "fire",
                }));
            }
            Ok(action)
        })
        .unwrap();

    damage
        .on(&bus)
        .publish(
            &ctx,
            DamageEvent {
                target: "fire-giant",
                amount: 6,
                damage_type: "slashing",
            },
        )
        .unwrap();

    assert_eq!(
        *log.lock(),
        vec![("fire-giant", 6), ("fighter", 3), ("fire-giant", 1)]
    );
    assert_eq!(bus.depth(), 0);
}
