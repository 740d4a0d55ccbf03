use serde::{
    de::{Deserialize, Deserializer},
    ser::{Error as _, Serialize, Serializer},
};

use crate::{Container, Synchronized};

/// A container serializes as its latest published value (`Some`) or as
/// `None` when nothing has been published. Snapshotting requires a
/// lockout, so serialization fails while any read or write handle exists.
impl<T: Serialize> Serialize for Container<T> {
    fn serialize<SER>(&self, serializer: SER) -> Result<SER::Ok, SER::Error>
    where
        SER: Serializer,
    {
        self.with_latest(|value| match value {
            Some(value) => serializer.serialize_some(value),
            None => serializer.serialize_none(),
        })
        .ok_or_else(|| SER::Error::custom("container has outstanding handles"))?
    }
}

impl<T: Serialize> Serialize for Synchronized<T> {
    #[inline]
    fn serialize<SER>(&self, serializer: SER) -> Result<SER::Ok, SER::Error>
    where
        SER: Serializer,
    {
        self.container().serialize(serializer)
    }
}

/// Deserializes into an expandable container; a `Some` value is published
/// so the first reader sees it, a `None` yields the never-published state.
impl<'de, T> Deserialize<'de> for Container<T>
where
    T: Deserialize<'de> + Clone + Default,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Option<T> = Option::deserialize(deserializer)?;

        let container = Container::expandable(value.clone().unwrap_or_default());
        if let Some(value) = value {
            let mut w = container
                .write()
                .expect("a fresh container has a free writer gate");
            *w = value;
            w.publish();
        }

        Ok(container)
    }
}

impl<'de, T> Deserialize<'de> for Synchronized<T>
where
    T: Deserialize<'de> + Clone + Default,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Synchronized::from_container(Container::deserialize(
            deserializer,
        )?))
    }
}
