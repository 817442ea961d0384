use super::{DataModel, DataObject, LogicalDevice, LogicalNode, Value, ValueKind};

/// Builds a [`DataModel`] device by device.
///
/// # Examples
///
/// ```
/// use der_scheduler::model::{DataModel, Value, ValueKind};
///
/// let model = DataModel::builder("IED1")
///     .device("LD0", |ld| {
///         ld.node("GGIO1", |ln| {
///             ln.object("Ind1", &[("stVal", ValueKind::Bool)])
///                 .value("Ind1.stVal", Value::Bool(true));
///         });
///     })
///     .build();
///
/// assert_eq!(model.get_bool("LD0/GGIO1.Ind1.stVal"), Some(true));
/// ```
pub struct ModelBuilder {
    ied_name: String,
    devices: Vec<LogicalDevice>,
    initial: Vec<(String, Value)>,
}

impl ModelBuilder {
    pub fn new(ied_name: impl Into<String>) -> Self {
        Self {
            ied_name: ied_name.into(),
            devices: Vec::new(),
            initial: Vec::new(),
        }
    }

    /// Adds a logical device and lets `f` populate its nodes.
    pub fn device(mut self, inst: &str, f: impl FnOnce(&mut DeviceBuilder)) -> Self {
        let mut builder = DeviceBuilder {
            inst: inst.to_string(),
            nodes: Vec::new(),
            initial: Vec::new(),
        };
        f(&mut builder);
        self.initial.extend(builder.initial);
        self.devices.push(LogicalDevice {
            inst: builder.inst,
            nodes: builder.nodes,
        });
        self
    }

    pub fn build(self) -> DataModel {
        DataModel::from_parts(self.ied_name, self.devices, self.initial)
    }
}

pub struct DeviceBuilder {
    inst: String,
    nodes: Vec<LogicalNode>,
    initial: Vec<(String, Value)>,
}

impl DeviceBuilder {
    /// Adds a logical node and lets `f` populate its data objects.
    pub fn node(&mut self, name: &str, f: impl FnOnce(&mut NodeBuilder)) -> &mut Self {
        let mut builder = NodeBuilder {
            objects: Vec::new(),
            initial: Vec::new(),
        };
        f(&mut builder);

        let prefix = format!("{}/{name}", self.inst);
        self.initial.extend(
            builder
                .initial
                .into_iter()
                .map(|(path, value)| (format!("{prefix}.{path}"), value)),
        );
        self.nodes.push(LogicalNode {
            name: name.to_string(),
            objects: builder.objects,
        });
        self
    }
}

pub struct NodeBuilder {
    objects: Vec<DataObject>,
    initial: Vec<(String, Value)>,
}

impl NodeBuilder {
    /// Declares a data object. Declaring the same name twice merges the
    /// attribute lists.
    pub fn object(&mut self, name: &str, attributes: &[(&str, ValueKind)]) -> &mut Self {
        let index = match self.objects.iter().position(|o| o.name == name) {
            Some(index) => index,
            None => {
                self.objects.push(DataObject {
                    name: name.to_string(),
                    attributes: Vec::new(),
                });
                self.objects.len() - 1
            }
        };

        let object = &mut self.objects[index];
        for (attr, kind) in attributes {
            if object.attribute(attr).is_none() {
                object.attributes.push(((*attr).to_string(), *kind));
            }
        }
        self
    }

    /// Sets the initial value of `<object>.<attr>`.
    pub fn value(&mut self, path: &str, value: Value) -> &mut Self {
        self.initial.push((path.to_string(), value));
        self
    }
}
