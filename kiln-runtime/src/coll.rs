//! Persistent collection operations shared by natives and host members

use std::sync::Arc;

use crate::error::{Result, Thrown};
use crate::value::Value;

pub fn count(coll: &Value) -> Result<usize> {
    Ok(match coll {
        Value::Nil => 0,
        Value::List(items) | Value::Vector(items) => items.len(),
        Value::Map(map) => map.len(),
        Value::Set(set) => set.len(),
        Value::Str(s) => s.chars().count(),
        other => {
            return Err(Thrown::unsupported(format!(
                "count not supported on this type: {}",
                other.class_name()
            )))
        }
    })
}

/// Keyed lookup; deftype instances answer for their field names
pub fn get(coll: &Value, key: &Value, default: Value) -> Value {
    match (coll, key) {
        (Value::Map(map), _) => map.get(key).cloned().unwrap_or(default),
        (Value::Set(set), _) => {
            if set.contains(key) {
                key.clone()
            } else {
                default
            }
        }
        (Value::Vector(items), Value::Long(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| items.get(i).cloned())
            .unwrap_or(default),
        (Value::Instance(inst), Value::Keyword(k)) if k.ns().is_none() => {
            match inst.ty.field_index(k.name()) {
                Some(i) => inst.fields.lock()[i].to_value(),
                None => default,
            }
        }
        _ => default,
    }
}

pub fn nth(coll: &Value, index: i64, default: Option<Value>) -> Result<Value> {
    let found = match coll {
        Value::Nil => None,
        Value::List(items) | Value::Vector(items) => {
            usize::try_from(index).ok().and_then(|i| items.get(i).cloned())
        }
        Value::Str(s) => usize::try_from(index)
            .ok()
            .and_then(|i| s.chars().nth(i))
            .map(Value::Char),
        other => {
            return Err(Thrown::unsupported(format!(
                "nth not supported on this type: {}",
                other.class_name()
            )))
        }
    };
    match (found, default) {
        (Some(v), _) => Ok(v),
        (None, Some(d)) => Ok(d),
        (None, None) => Err(Thrown::index_out_of_bounds(index)),
    }
}

pub fn conj(coll: &Value, item: Value) -> Result<Value> {
    Ok(match coll {
        Value::Nil => Value::list(vec![item]),
        Value::List(items) => {
            let mut v = Vec::with_capacity(items.len() + 1);
            v.push(item);
            v.extend(items.iter().cloned());
            Value::list(v)
        }
        Value::Vector(items) => {
            let mut v = items.as_ref().clone();
            v.push(item);
            Value::vector(v)
        }
        Value::Set(set) => {
            let mut s = set.as_ref().clone();
            s.insert(item);
            Value::Set(Arc::new(s))
        }
        Value::Map(map) => match &item {
            Value::Vector(pair) if pair.len() == 2 => {
                let mut m = map.as_ref().clone();
                m.insert(pair[0].clone(), pair[1].clone());
                Value::Map(Arc::new(m))
            }
            _ => {
                return Err(Thrown::illegal_argument(
                    "Vector arg to map conj must be a pair",
                ))
            }
        },
        other => return Err(Thrown::class_cast(other, "IPersistentCollection")),
    })
}

pub fn assoc(coll: &Value, key: Value, value: Value) -> Result<Value> {
    Ok(match coll {
        Value::Nil => Value::map([(key, value)]),
        Value::Map(map) => {
            let mut m = map.as_ref().clone();
            m.insert(key, value);
            Value::Map(Arc::new(m))
        }
        Value::Vector(items) => {
            let i = key
                .as_long()
                .ok_or_else(|| Thrown::illegal_argument("Key must be integer"))?;
            let mut v = items.as_ref().clone();
            match usize::try_from(i) {
                Ok(i) if i < v.len() => v[i] = value,
                Ok(i) if i == v.len() => v.push(value),
                _ => return Err(Thrown::index_out_of_bounds(i)),
            }
            Value::vector(v)
        }
        other => return Err(Thrown::class_cast(other, "Associative")),
    })
}

pub fn dissoc(coll: &Value, key: &Value) -> Result<Value> {
    Ok(match coll {
        Value::Nil => Value::Nil,
        Value::Map(map) => {
            let mut m = map.as_ref().clone();
            m.shift_remove(key);
            Value::Map(Arc::new(m))
        }
        other => return Err(Thrown::class_cast(other, "IPersistentMap")),
    })
}

pub fn contains(coll: &Value, key: &Value) -> bool {
    match (coll, key) {
        (Value::Map(map), _) => map.contains_key(key),
        (Value::Set(set), _) => set.contains(key),
        (Value::Vector(items), Value::Long(i)) => *i >= 0 && (*i as usize) < items.len(),
        _ => false,
    }
}

pub fn first(coll: &Value) -> Result<Value> {
    Ok(coll.seq_items()?.into_iter().next().unwrap_or(Value::Nil))
}

/// Everything after the first element, as a list (never nil)
pub fn rest(coll: &Value) -> Result<Value> {
    Ok(Value::list(coll.seq_items()?.into_iter().skip(1).collect()))
}

pub fn cons(item: Value, coll: &Value) -> Result<Value> {
    let mut items = vec![item];
    items.extend(coll.seq_items()?);
    Ok(Value::list(items))
}

/// nil for empty collections, a list otherwise
pub fn seq(coll: &Value) -> Result<Value> {
    let items = coll.seq_items()?;
    Ok(if items.is_empty() {
        Value::Nil
    } else {
        Value::list(items)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn longs(ns: &[i64]) -> Vec<Value> {
        ns.iter().map(|n| Value::Long(*n)).collect()
    }

    #[test]
    fn test_conj_by_collection() {
        let l = conj(&Value::list(longs(&[2, 3])), Value::Long(1)).unwrap();
        assert_eq!(l, Value::list(longs(&[1, 2, 3])));
        let v = conj(&Value::vector(longs(&[1, 2])), Value::Long(3)).unwrap();
        assert_eq!(v, Value::vector(longs(&[1, 2, 3])));
    }

    #[test]
    fn test_get_and_nth() {
        let m = Value::map([(Value::keyword("a"), Value::Long(1))]);
        assert_eq!(get(&m, &Value::keyword("a"), Value::Nil), Value::Long(1));
        assert_eq!(get(&m, &Value::keyword("b"), Value::Long(9)), Value::Long(9));
        let v = Value::vector(longs(&[5, 6]));
        assert_eq!(nth(&v, 1, None).unwrap(), Value::Long(6));
        assert!(nth(&v, 2, None).is_err());
        assert_eq!(nth(&v, 2, Some(Value::Nil)).unwrap(), Value::Nil);
    }

    #[test]
    fn test_assoc_vector_bounds() {
        let v = Value::vector(longs(&[1]));
        assert_eq!(
            assoc(&v, Value::Long(1), Value::Long(2)).unwrap(),
            Value::vector(longs(&[1, 2]))
        );
        assert!(assoc(&v, Value::Long(5), Value::Long(2)).is_err());
    }

    #[test]
    fn test_seq_of_empty_is_nil() {
        assert_eq!(seq(&Value::vector(vec![])).unwrap(), Value::Nil);
        assert_eq!(count(&Value::string("héllo")).unwrap(), 5);
    }
}
